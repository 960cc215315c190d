use thiserror::Error;

use crate::{AccountId, Amount, Duration, Timestamp};

/// Refusals reported by a [`crate::custodian::TokenCustodian`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("account {account} holds {available}, needs {requested}")]
    InsufficientBalance {
        account: AccountId,
        available: Amount,
        requested: Amount,
    },

    #[error("account {account} approved {approved} for custody, needs {requested}")]
    InsufficientAllowance {
        account: AccountId,
        approved: Amount,
        requested: Amount,
    },

    /// The custodian holds less on the ledger's behalf than it was asked to release.
    #[error("custody holds {available}, cannot release {requested}")]
    InsufficientCustody { available: Amount, requested: Amount },

    #[error("balance overflow")]
    Overflow,
}

/// Canonical error type of the lock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("lock amount must be positive")]
    AmountMustBePositive,

    #[error("lock period {requested}s is shorter than the minimum {minimum}s")]
    LockPeriodTooShort { requested: Duration, minimum: Duration },

    #[error("account {account} already has an active lock")]
    AlreadyLocked { account: AccountId },

    /// Covers both "never locked" and "already unlocked".
    #[error("account {account} has nothing to unlock")]
    NothingToUnlock { account: AccountId },

    #[error("account {account} is locked until {unlock_time} (now {now})")]
    StillLocked {
        account: AccountId,
        unlock_time: Timestamp,
        now: Timestamp,
    },

    #[error("unlock time overflows: now {now} + duration {duration}")]
    TimestampOverflow { now: Timestamp, duration: Duration },

    #[error("custody transfer failed: {0}")]
    CustodyTransferFailed(#[from] CustodyError),

    #[error("invalid ledger configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(
        "ledger out of balance: deposited {deposited} - withdrawn {withdrawn}, \
         locked {locked}, custodian holds {custody}"
    )]
    Imbalance {
        deposited: u128,
        withdrawn: u128,
        locked: u128,
        custody: Amount,
    },

    #[error("snapshot state root mismatch: recorded {recorded}, computed {computed}")]
    SnapshotMismatch { recorded: String, computed: String },
}
