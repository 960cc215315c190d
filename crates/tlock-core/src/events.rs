use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, Timestamp};

/// Observable outcome of a committed ledger operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Locked {
        account: AccountId,
        amount: Amount,
        unlock_time: Timestamp,
    },
    Unlocked {
        account: AccountId,
        amount: Amount,
    },
}

impl LedgerEvent {
    pub fn account(&self) -> &AccountId {
        match self {
            LedgerEvent::Locked { account, .. } | LedgerEvent::Unlocked { account, .. } => account,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            LedgerEvent::Locked { amount, .. } | LedgerEvent::Unlocked { amount, .. } => *amount,
        }
    }
}
