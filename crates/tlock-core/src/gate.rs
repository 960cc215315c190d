use thiserror::Error;
use tracing::{debug, info};

use crate::custodian::TokenCustodian;
use crate::events::LedgerEvent;
use crate::ledger::LockLedger;
use crate::participants::Membership;
use crate::{AccountId, Amount, Duration, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("account {0} is not a participant")]
    NotParticipant(AccountId),

    #[error("{caller} is not the ledger owner")]
    Unauthorized { caller: AccountId },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Participant check in front of a [`LockLedger`]. The ledger itself stays
/// unaware of membership; callers that do not need gating use it directly.
pub struct GatedLedger<'a, C, M> {
    ledger: &'a mut LockLedger<C>,
    members: &'a mut M,
}

impl<'a, C: TokenCustodian, M: Membership> GatedLedger<'a, C, M> {
    pub fn new(ledger: &'a mut LockLedger<C>, members: &'a mut M) -> Self {
        Self { ledger, members }
    }

    pub fn lock(
        &mut self,
        account: &AccountId,
        amount: Amount,
        duration: Duration,
    ) -> Result<LedgerEvent, GateError> {
        self.ensure_member(account)?;
        Ok(self.ledger.lock(account, amount, duration)?)
    }

    pub fn unlock(&mut self, account: &AccountId) -> Result<LedgerEvent, GateError> {
        self.ensure_member(account)?;
        Ok(self.ledger.unlock(account)?)
    }

    /// Owner-only. Returns whether `account` was newly admitted.
    pub fn admit(&mut self, caller: &AccountId, account: AccountId) -> Result<bool, GateError> {
        self.ensure_owner(caller)?;
        let added = self.members.add(account.clone());
        info!(%account, added, "admit participant");
        Ok(added)
    }

    /// Owner-only. A revoked account keeps its active lock but cannot unlock
    /// through the gate until readmitted.
    pub fn revoke(&mut self, caller: &AccountId, account: &AccountId) -> Result<bool, GateError> {
        self.ensure_owner(caller)?;
        let removed = self.members.remove(account);
        info!(%account, removed, "revoke participant");
        Ok(removed)
    }

    pub fn ledger(&self) -> &LockLedger<C> {
        &*self.ledger
    }

    fn ensure_member(&self, account: &AccountId) -> Result<(), GateError> {
        if self.members.is_member(account) {
            return Ok(());
        }
        debug!(%account, "rejected non-participant");
        Err(GateError::NotParticipant(account.clone()))
    }

    fn ensure_owner(&self, caller: &AccountId) -> Result<(), GateError> {
        if caller == self.ledger.owner() {
            return Ok(());
        }
        Err(GateError::Unauthorized {
            caller: caller.clone(),
        })
    }
}
