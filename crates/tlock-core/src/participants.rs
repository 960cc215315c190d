use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Allow-list capability. `add` and `remove` report whether membership
/// actually changed.
pub trait Membership {
    fn is_member(&self, account: &AccountId) -> bool;
    fn add(&mut self, account: AccountId) -> bool;
    fn remove(&mut self, account: &AccountId) -> bool;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ParticipantRegistry {
    members: BTreeSet<AccountId>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountId> {
        self.members.iter()
    }
}

impl Membership for ParticipantRegistry {
    fn is_member(&self, account: &AccountId) -> bool {
        self.members.contains(account)
    }

    fn add(&mut self, account: AccountId) -> bool {
        self.members.insert(account)
    }

    fn remove(&mut self, account: &AccountId) -> bool {
        self.members.remove(account)
    }
}

impl FromIterator<AccountId> for ParticipantRegistry {
    fn from_iter<I: IntoIterator<Item = AccountId>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}
