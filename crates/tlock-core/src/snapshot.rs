use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::config::LedgerSettings;
use crate::events::LedgerEvent;
use crate::ledger::{LedgerTotals, LockLedger, LockRecord};
use crate::{AccountId, LedgerError};

/// Serializable image of a [`LockLedger`], minus its custodian and clock.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub settings: LedgerSettings,
    pub records: BTreeMap<AccountId, LockRecord>,
    pub totals: LedgerTotals,
    pub events: Vec<LedgerEvent>,
    /// Covers settings, records and totals. The event log is excluded since
    /// it may be drained.
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        let computed = compute_state_root(&self.settings, &self.records, &self.totals);
        if computed != self.state_root {
            return Err(LedgerError::SnapshotMismatch {
                recorded: self.state_root_hex(),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }
}

impl<C> LockLedger<C> {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            settings: self.settings.clone(),
            records: self.records.clone(),
            totals: self.totals,
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(&self.settings, &self.records, &self.totals)
    }

    /// Rebuild a ledger from a verified snapshot. The custodian must be the
    /// one the snapshot was taken against; [`LockLedger::reconcile`] tells
    /// whether it is.
    pub fn restore(
        snapshot: LedgerSnapshot,
        custodian: C,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        snapshot.verify()?;
        snapshot.settings.validate()?;
        Ok(Self {
            settings: snapshot.settings,
            custodian,
            clock,
            records: snapshot.records,
            totals: snapshot.totals,
            events: snapshot.events,
        })
    }
}

fn compute_state_root(
    settings: &LedgerSettings,
    records: &BTreeMap<AccountId, LockRecord>,
    totals: &LedgerTotals,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(records.len() + 2);

    let mut hasher = Sha256::new();
    hasher.update(b"settings");
    hasher.update((settings.owner.len() as u64).to_le_bytes());
    hasher.update(settings.owner.as_bytes());
    hasher.update(settings.min_lock_duration.to_le_bytes());
    leaves.push(hasher.finalize().into());

    let mut hasher = Sha256::new();
    hasher.update(b"totals");
    hasher.update(totals.deposited.to_le_bytes());
    hasher.update(totals.withdrawn.to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (account, record) in records {
        let mut hasher = Sha256::new();
        hasher.update(b"lock");
        hasher.update((account.len() as u64).to_le_bytes());
        hasher.update(account.as_bytes());
        hasher.update(record.amount.to_le_bytes());
        hasher.update(record.unlock_time.to_le_bytes());
        hasher.update(record.original_lock_time.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
