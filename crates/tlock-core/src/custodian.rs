use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, CustodyError};

/// The fungible-token holder the ledger delegates balance movements to.
///
/// Implementations must be all-or-nothing: a call that returns `Err` leaves
/// every balance it manages untouched.
pub trait TokenCustodian {
    /// Move `amount` from `from`'s external balance into ledger custody.
    fn pull(&mut self, from: &AccountId, amount: Amount) -> Result<(), CustodyError>;

    /// Move `amount` out of ledger custody to `to`'s external balance.
    fn push(&mut self, to: &AccountId, amount: Amount) -> Result<(), CustodyError>;

    /// Units currently held on the ledger's behalf.
    fn custody_balance(&self) -> Amount;
}

/// Balance-and-allowance custodian kept entirely in memory.
///
/// A pull consumes both the account's balance and the allowance it granted
/// the ledger, mirroring an approve/transfer-from token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InMemoryCustodian {
    balances: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<AccountId, Amount>,
    custody: Amount,
}

impl InMemoryCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit freshly issued units to `account`.
    pub fn mint(&mut self, account: &AccountId, amount: Amount) -> Result<(), CustodyError> {
        let balance = self.balances.entry(account.clone()).or_default();
        *balance = balance.checked_add(amount).ok_or(CustodyError::Overflow)?;
        Ok(())
    }

    /// Set (not add to) the allowance `account` grants the ledger.
    pub fn approve(&mut self, account: &AccountId, amount: Amount) {
        if amount == 0 {
            self.allowances.remove(account);
        } else {
            self.allowances.insert(account.clone(), amount);
        }
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, account: &AccountId) -> Amount {
        self.allowances.get(account).copied().unwrap_or(0)
    }

    /// Sum of all external balances, custody excluded.
    pub fn circulating(&self) -> u128 {
        self.balances.values().map(|v| *v as u128).sum()
    }
}

impl TokenCustodian for InMemoryCustodian {
    fn pull(&mut self, from: &AccountId, amount: Amount) -> Result<(), CustodyError> {
        let approved = self.allowance(from);
        if approved < amount {
            return Err(CustodyError::InsufficientAllowance {
                account: from.clone(),
                approved,
                requested: amount,
            });
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(CustodyError::InsufficientBalance {
                account: from.clone(),
                available,
                requested: amount,
            });
        }
        let custody = self
            .custody
            .checked_add(amount)
            .ok_or(CustodyError::Overflow)?;

        self.custody = custody;
        self.balances.insert(from.clone(), available - amount);
        self.approve(from, approved - amount);
        Ok(())
    }

    fn push(&mut self, to: &AccountId, amount: Amount) -> Result<(), CustodyError> {
        if self.custody < amount {
            return Err(CustodyError::InsufficientCustody {
                available: self.custody,
                requested: amount,
            });
        }
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(CustodyError::Overflow)?;

        self.custody -= amount;
        self.balances.insert(to.clone(), balance);
        Ok(())
    }

    fn custody_balance(&self) -> Amount {
        self.custody
    }
}
