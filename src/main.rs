use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tlock_core::{
    clock::{Clock, FixedClock, SystemClock},
    config::{LedgerSettings, DEFAULT_MIN_LOCK_DURATION},
    gate::GatedLedger,
    AccountId, Amount, Duration,
};

mod state;

use state::{Session, StateLock};

//==================== Аргументы ====================//

#[derive(Parser)]
#[command(name = "tlock", version, about = "Time-locked token custody ledger")]
struct Cli {
    /// State file holding the ledger, custodian balances and allow-list.
    #[arg(long, global = true, env = "TLOCK_STATE", default_value = "tlock-state.json")]
    state: PathBuf,

    /// Pin the clock to this Unix timestamp instead of reading system time.
    #[arg(long, global = true)]
    now: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new state file.
    Init {
        #[arg(long)]
        owner: AccountId,
        /// Minimum lock duration (e.g. 604800, 7d, 168h).
        #[arg(long, value_parser = parse_duration)]
        min_lock: Option<Duration>,
        /// Require allow-list membership for lock/unlock.
        #[arg(long)]
        gated: bool,
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    #[command(flatten)]
    Ledger(LedgerCommand),
}

/// Commands that operate on an existing state file.
#[derive(Subcommand)]
enum LedgerCommand {
    /// Issue tokens to an account on the in-memory custodian.
    Mint { account: AccountId, amount: Amount },
    /// Set the allowance an account grants the ledger.
    Approve { account: AccountId, amount: Amount },
    /// Add an account to the allow-list (owner only).
    Admit {
        account: AccountId,
        #[arg(long)]
        caller: AccountId,
    },
    /// Remove an account from the allow-list (owner only).
    Revoke {
        account: AccountId,
        #[arg(long)]
        caller: AccountId,
    },
    /// List allow-list members.
    Members,
    /// Lock tokens for a duration.
    Lock {
        account: AccountId,
        amount: Amount,
        #[arg(value_parser = parse_duration)]
        duration: Duration,
    },
    /// Withdraw an elapsed lock.
    Unlock { account: AccountId },
    /// Show an account's lock record.
    Info { account: AccountId },
    /// Show an account's external balance and allowance.
    Balance { account: AccountId },
    /// Print the event log. The state file keeps at most the newest
    /// 10000 events; drain regularly to archive them elsewhere.
    Events {
        /// Clear the log after printing.
        #[arg(long)]
        drain: bool,
    },
    /// Reconcile custody and print the state root.
    Audit,
}

//==================== Утилиты ====================//

/// Seconds, optionally suffixed with `s`, `m`, `h`, `d` or `w`.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c),
        _ => (raw, 's'),
    };
    let scale: u64 = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
    value
        .checked_mul(scale)
        .ok_or_else(|| format!("duration '{raw}' overflows"))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

//==================== Команды ====================//

fn run(cli: Cli) -> Result<()> {
    let clock: Arc<dyn Clock> = match cli.now {
        Some(now) => Arc::new(FixedClock(now)),
        None => Arc::new(SystemClock),
    };
    let path = cli.state;
    let mut lock = StateLock::open(&path)?;
    let _guard = lock.exclusive()?;

    match cli.command {
        Command::Init {
            owner,
            min_lock,
            gated,
            force,
        } => init_cmd(&path, owner, min_lock, gated, force, clock),
        Command::Ledger(command) => {
            let mut session = Session::load(&path, clock)?;
            // только успешные команды доходят до save
            if execute(&mut session, command)? {
                session.save(&path)?;
            }
            Ok(())
        }
    }
}

/// Apply one command; returns whether the session changed.
fn execute(session: &mut Session, command: LedgerCommand) -> Result<bool> {
    let dirty = match command {
        LedgerCommand::Mint { account, amount } => {
            session
                .ledger
                .custodian_mut()
                .mint(&account, amount)
                .with_context(|| format!("mint {amount} to {account}"))?;
            balance_cmd(session, &account)?;
            true
        }
        LedgerCommand::Approve { account, amount } => {
            session.ledger.custodian_mut().approve(&account, amount);
            balance_cmd(session, &account)?;
            true
        }
        LedgerCommand::Admit { account, caller } => {
            let mut gate = GatedLedger::new(&mut session.ledger, &mut session.participants);
            let added = gate.admit(&caller, account.clone())?;
            print_json(&json!({ "account": account, "admitted": added }))?;
            added
        }
        LedgerCommand::Revoke { account, caller } => {
            let mut gate = GatedLedger::new(&mut session.ledger, &mut session.participants);
            let removed = gate.revoke(&caller, &account)?;
            print_json(&json!({ "account": account, "revoked": removed }))?;
            removed
        }
        LedgerCommand::Members => {
            let members: Vec<_> = session.participants.iter().collect();
            print_json(&json!({ "gated": session.gated, "members": members }))?;
            false
        }
        LedgerCommand::Lock {
            account,
            amount,
            duration,
        } => {
            let event = if session.gated {
                GatedLedger::new(&mut session.ledger, &mut session.participants)
                    .lock(&account, amount, duration)?
            } else {
                session.ledger.lock(&account, amount, duration)?
            };
            print_json(&serde_json::to_value(event)?)?;
            true
        }
        LedgerCommand::Unlock { account } => {
            let event = if session.gated {
                GatedLedger::new(&mut session.ledger, &mut session.participants)
                    .unlock(&account)?
            } else {
                session.ledger.unlock(&account)?
            };
            print_json(&serde_json::to_value(event)?)?;
            true
        }
        LedgerCommand::Info { account } => {
            let record = session.ledger.get_lock_info(&account);
            print_json(&json!({
                "account": account,
                "amount": record.amount,
                "unlock_time": record.unlock_time,
                "original_lock_time": record.original_lock_time,
                "active": record.is_active(),
                "unlockable": session.ledger.is_unlockable(&account),
            }))?;
            false
        }
        LedgerCommand::Balance { account } => {
            balance_cmd(session, &account)?;
            false
        }
        LedgerCommand::Events { drain } => {
            let events = if drain {
                session.ledger.drain_events()
            } else {
                session.ledger.events().to_vec()
            };
            print_json(&serde_json::to_value(events)?)?;
            drain
        }
        LedgerCommand::Audit => {
            session.ledger.reconcile()?;
            let totals = session.ledger.totals();
            print_json(&json!({
                "state_root": hex::encode(session.ledger.state_root()),
                "accounts": session.ledger.records().count(),
                "total_locked": session.ledger.total_locked().to_string(),
                "deposited": totals.deposited.to_string(),
                "withdrawn": totals.withdrawn.to_string(),
                "custody": session.ledger.custody_balance(),
            }))?;
            false
        }
    };
    Ok(dirty)
}

fn init_cmd(
    path: &Path,
    owner: AccountId,
    min_lock: Option<Duration>,
    gated: bool,
    force: bool,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let settings = LedgerSettings {
        owner,
        min_lock_duration: min_lock.unwrap_or(DEFAULT_MIN_LOCK_DURATION),
    };
    let session = Session::create(settings, gated, clock)?;
    session.save(path)?;
    info!(path = %path.display(), gated, "state initialised");
    print_json(&json!({
        "state": path.display().to_string(),
        "settings": session.ledger.settings(),
        "gated": gated,
    }))
}

fn balance_cmd(session: &Session, account: &AccountId) -> Result<()> {
    let custodian = session.ledger.custodian();
    print_json(&json!({
        "account": account,
        "balance": custodian.balance_of(account),
        "allowance": custodian.allowance(account),
        "locked": session.ledger.get_lock_info(account).amount,
    }))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
