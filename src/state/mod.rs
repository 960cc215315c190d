use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tlock_core::{
    clock::Clock,
    config::{LedgerConfig, LedgerSettings},
    custodian::InMemoryCustodian,
    events::LedgerEvent,
    ledger::LockLedger,
    participants::ParticipantRegistry,
    snapshot::LedgerSnapshot,
};

pub const STATE_VERSION: u8 = 1;

/// Oldest events beyond this many are dropped when the state is written.
pub const MAX_PERSISTED_EVENTS: usize = 10_000;

/// On-disk layout of a state file.
#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u8,
    gated: bool,
    ledger: LedgerSnapshot,
    custodian: InMemoryCustodian,
    participants: ParticipantRegistry,
}

/// Advisory lock on `<state>.lock`, held from load until save.
///
/// The state file itself is replaced by rename on every save, so the lock
/// lives on a sibling that is never rewritten.
pub struct StateLock {
    lock: RwLock<File>,
}

impl StateLock {
    pub fn open(state: &Path) -> Result<Self> {
        ensure_parent(state)?;
        let path = sibling(state, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        Ok(Self {
            lock: RwLock::new(file),
        })
    }

    /// Blocks until no other process holds the lock.
    pub fn exclusive(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        self.lock.write().context("acquire state lock")
    }

    /// Fails instead of waiting when the lock is taken.
    pub fn try_exclusive(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        self.lock.try_write().context("state lock is held elsewhere")
    }
}

/// Everything a single CLI invocation operates on.
pub struct Session {
    pub ledger: LockLedger<InMemoryCustodian>,
    pub participants: ParticipantRegistry,
    /// Whether lock/unlock go through the participant gate.
    pub gated: bool,
}

impl Session {
    pub fn create(settings: LedgerSettings, gated: bool, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = LedgerConfig {
            custodian: InMemoryCustodian::new(),
            clock,
            settings,
        };
        let ledger = LockLedger::from_config(config).context("invalid ledger settings")?;
        Ok(Self {
            ledger,
            participants: ParticipantRegistry::new(),
            gated,
        })
    }

    /// Refuses a state whose locks do not reconcile with the custodian; the
    /// state root does not cover custodian balances.
    pub fn load(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("read state file {}", path.display()))?;
        let state: StateFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse state file {}", path.display()))?;
        if state.version != STATE_VERSION {
            bail!(
                "state file {} has version {}, expected {}",
                path.display(),
                state.version,
                STATE_VERSION
            );
        }
        let ledger = LockLedger::restore(state.ledger, state.custodian, clock)
            .with_context(|| format!("restore ledger from {}", path.display()))?;
        ledger
            .reconcile()
            .with_context(|| format!("state file {} does not reconcile", path.display()))?;
        debug!(path = %path.display(), "state loaded");
        Ok(Self {
            ledger,
            participants: state.participants,
            gated: state.gated,
        })
    }

    /// Write and fsync a sibling temp file, then rename it over `path`, so a
    /// crash leaves either the old or the new state.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut snapshot = self.ledger.snapshot();
        let dropped = trim_events(&mut snapshot.events, MAX_PERSISTED_EVENTS);
        if dropped > 0 {
            warn!(dropped, "event log over capacity, oldest events not persisted");
        }
        let state = StateFile {
            version: STATE_VERSION,
            gated: self.gated,
            ledger: snapshot,
            custodian: self.ledger.custodian().clone(),
            participants: self.participants.clone(),
        };
        let json = serde_json::to_vec_pretty(&state).context("encode state")?;

        ensure_parent(path)?;
        let tmp = sibling(path, ".tmp");
        let mut file =
            File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(&json)
            .and_then(|()| file.sync_all())
            .with_context(|| format!("write {}", tmp.display()))?;
        drop(file);
        fs::rename(&tmp, path)
            .with_context(|| format!("move {} into place", tmp.display()))?;
        debug!(path = %path.display(), "state saved");
        Ok(())
    }
}

/// Keep the newest `cap` events; returns how many were dropped.
fn trim_events(events: &mut Vec<LedgerEvent>, cap: usize) -> usize {
    let excess = events.len().saturating_sub(cap);
    events.drain(..excess);
    excess
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
