use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::{AccountId, Duration, LedgerError};

/// Seven days.
pub const DEFAULT_MIN_LOCK_DURATION: Duration = 7 * 24 * 60 * 60;

/// Persisted part of the ledger configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Administrator identity; owns the participant allow-list.
    pub owner: AccountId,
    pub min_lock_duration: Duration,
}

impl LedgerSettings {
    pub fn new(owner: impl Into<AccountId>) -> Self {
        Self {
            owner: owner.into(),
            min_lock_duration: DEFAULT_MIN_LOCK_DURATION,
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.owner.is_empty() {
            return Err(LedgerError::InvalidConfig("owner must not be empty"));
        }
        if self.min_lock_duration == 0 {
            return Err(LedgerError::InvalidConfig(
                "minimum lock duration must be positive",
            ));
        }
        Ok(())
    }
}

/// Everything a [`crate::ledger::LockLedger`] is built from. Assembled once;
/// the ledger never re-reads or replaces it.
pub struct LedgerConfig<C> {
    pub custodian: C,
    pub clock: Arc<dyn Clock>,
    pub settings: LedgerSettings,
}

impl<C> LedgerConfig<C> {
    /// System clock and the default minimum lock duration.
    pub fn new(custodian: C, owner: impl Into<AccountId>) -> Self {
        Self {
            custodian,
            clock: Arc::new(SystemClock),
            settings: LedgerSettings::new(owner),
        }
    }

    pub fn with_min_lock_duration(mut self, duration: Duration) -> Self {
        self.settings.min_lock_duration = duration;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
