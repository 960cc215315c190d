use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{LedgerConfig, LedgerSettings};
use crate::custodian::TokenCustodian;
use crate::events::LedgerEvent;
use crate::{AccountId, Amount, Duration, LedgerError, Timestamp};

/// Per-account lock state. The zero value means "no active lock".
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LockRecord {
    pub amount: Amount,
    /// Only meaningful while `amount > 0`.
    pub unlock_time: Timestamp,
    /// Duration requested when the lock was created.
    pub original_lock_time: Duration,
}

impl LockRecord {
    pub fn is_active(&self) -> bool {
        self.amount > 0
    }
}

/// Lifetime custody counters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    pub deposited: u128,
    pub withdrawn: u128,
}

impl LedgerTotals {
    /// `None` if more was withdrawn than ever deposited.
    pub fn outstanding(&self) -> Option<u128> {
        self.deposited.checked_sub(self.withdrawn)
    }
}

/// One time-lock per account over a [`TokenCustodian`].
///
/// Mutation goes through [`LockLedger::lock`] and [`LockLedger::unlock`]
/// only. Both validate everything before the custody call and commit state
/// only after it succeeds, so a rejected call leaves records, totals, events
/// and custodian balances exactly as they were.
pub struct LockLedger<C> {
    pub(crate) settings: LedgerSettings,
    pub(crate) custodian: C,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) records: BTreeMap<AccountId, LockRecord>,
    pub(crate) totals: LedgerTotals,
    pub(crate) events: Vec<LedgerEvent>,
}

impl<C: TokenCustodian> LockLedger<C> {
    pub fn from_config(config: LedgerConfig<C>) -> Result<Self, LedgerError> {
        config.settings.validate()?;
        Ok(Self {
            settings: config.settings,
            custodian: config.custodian,
            clock: config.clock,
            records: BTreeMap::new(),
            totals: LedgerTotals::default(),
            events: Vec::new(),
        })
    }

    /// Pull `amount` into custody for `duration` seconds.
    pub fn lock(
        &mut self,
        account: &AccountId,
        amount: Amount,
        duration: Duration,
    ) -> Result<LedgerEvent, LedgerError> {
        let now = self.clock.now();
        let unlock_time = self
            .check_lock(account, amount, duration, now)
            .inspect_err(|err| debug!(%account, amount, duration, %err, "lock rejected"))?;

        self.custodian.pull(account, amount).map_err(|err| {
            warn!(%account, amount, %err, "custody pull refused");
            LedgerError::from(err)
        })?;

        self.records.insert(
            account.clone(),
            LockRecord {
                amount,
                unlock_time,
                original_lock_time: duration,
            },
        );
        self.totals.deposited += amount as u128;

        let event = LedgerEvent::Locked {
            account: account.clone(),
            amount,
            unlock_time,
        };
        self.events.push(event.clone());
        info!(%account, amount, unlock_time, "locked");
        Ok(event)
    }

    /// Push the whole locked amount back once `unlock_time` is reached.
    pub fn unlock(&mut self, account: &AccountId) -> Result<LedgerEvent, LedgerError> {
        let now = self.clock.now();
        let amount = self
            .check_unlock(account, now)
            .inspect_err(|err| debug!(%account, %err, "unlock rejected"))?;

        self.custodian.push(account, amount).map_err(|err| {
            warn!(%account, amount, %err, "custody push refused");
            LedgerError::from(err)
        })?;

        if let Some(record) = self.records.get_mut(account) {
            record.amount = 0;
        }
        self.totals.withdrawn += amount as u128;

        let event = LedgerEvent::Unlocked {
            account: account.clone(),
            amount,
        };
        self.events.push(event.clone());
        info!(%account, amount, "unlocked");
        Ok(event)
    }

    fn check_lock(
        &self,
        account: &AccountId,
        amount: Amount,
        duration: Duration,
        now: Timestamp,
    ) -> Result<Timestamp, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::AmountMustBePositive);
        }
        let minimum = self.settings.min_lock_duration;
        if duration < minimum {
            return Err(LedgerError::LockPeriodTooShort {
                requested: duration,
                minimum,
            });
        }
        if self.get_lock_info(account).is_active() {
            return Err(LedgerError::AlreadyLocked {
                account: account.clone(),
            });
        }
        now.checked_add(duration)
            .ok_or(LedgerError::TimestampOverflow { now, duration })
    }

    fn check_unlock(&self, account: &AccountId, now: Timestamp) -> Result<Amount, LedgerError> {
        let record = self.get_lock_info(account);
        if !record.is_active() {
            return Err(LedgerError::NothingToUnlock {
                account: account.clone(),
            });
        }
        if now < record.unlock_time {
            return Err(LedgerError::StillLocked {
                account: account.clone(),
                unlock_time: record.unlock_time,
                now,
            });
        }
        Ok(record.amount)
    }

    /// Units held by the custodian on the ledger's behalf.
    pub fn custody_balance(&self) -> Amount {
        self.custodian.custody_balance()
    }

    /// Check that lifetime deposits minus withdrawals, the sum of active
    /// locks and the custodian's custody balance all agree.
    pub fn reconcile(&self) -> Result<(), LedgerError> {
        let locked = self.total_locked();
        let custody = self.custodian.custody_balance();
        match self.totals.outstanding() {
            Some(outstanding) if outstanding == locked && locked == custody as u128 => Ok(()),
            _ => Err(LedgerError::Imbalance {
                deposited: self.totals.deposited,
                withdrawn: self.totals.withdrawn,
                locked,
                custody,
            }),
        }
    }
}

impl<C> LockLedger<C> {
    /// Current record for `account`; the zero record if it never locked.
    pub fn get_lock_info(&self, account: &AccountId) -> LockRecord {
        self.records.get(account).copied().unwrap_or_default()
    }

    /// Whether `unlock` would pass the ledger's own checks right now.
    pub fn is_unlockable(&self, account: &AccountId) -> bool {
        let record = self.get_lock_info(account);
        record.is_active() && self.clock.now() >= record.unlock_time
    }

    pub fn records(&self) -> impl Iterator<Item = (&AccountId, &LockRecord)> {
        self.records.iter()
    }

    pub fn total_locked(&self) -> u128 {
        self.records.values().map(|r| r.amount as u128).sum()
    }

    pub fn totals(&self) -> LedgerTotals {
        self.totals
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn owner(&self) -> &AccountId {
        &self.settings.owner
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Hand the event log to a consumer, leaving it empty.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn custodian(&self) -> &C {
        &self.custodian
    }

    /// Direct access for issuance and allowances. Custody moved through
    /// this handle bypasses the ledger and shows up in [`Self::reconcile`].
    pub fn custodian_mut(&mut self) -> &mut C {
        &mut self.custodian
    }

    pub fn into_custodian(self) -> C {
        self.custodian
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::clock::ManualClock;
    use crate::config::DEFAULT_MIN_LOCK_DURATION;
    use crate::custodian::InMemoryCustodian;
    use crate::CustodyError;

    pub(crate) const WEEK: Duration = DEFAULT_MIN_LOCK_DURATION;
    const DAY: Duration = 24 * 60 * 60;
    const START: Timestamp = 1_700_000_000;

    pub(crate) fn funded_ledger(
        accounts: &[(&str, Amount)],
    ) -> (LockLedger<InMemoryCustodian>, Arc<ManualClock>) {
        let mut custodian = InMemoryCustodian::new();
        for (account, balance) in accounts {
            let account = account.to_string();
            custodian.mint(&account, *balance).unwrap();
            custodian.approve(&account, *balance);
        }
        let clock = Arc::new(ManualClock::new(START));
        let config = LedgerConfig::new(custodian, "admin").with_clock(clock.clone());
        (LockLedger::from_config(config).unwrap(), clock)
    }

    fn alice() -> AccountId {
        "alice".to_string()
    }

    #[test]
    fn lock_records_amount_unlock_time_and_event() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 1_000)]);
        let event = ledger.lock(&alice(), 100, WEEK).unwrap();
        assert_eq!(
            event,
            LedgerEvent::Locked {
                account: alice(),
                amount: 100,
                unlock_time: START + WEEK,
            }
        );
        assert_eq!(
            ledger.get_lock_info(&alice()),
            LockRecord {
                amount: 100,
                unlock_time: START + WEEK,
                original_lock_time: WEEK,
            }
        );
        assert_eq!(ledger.custodian().balance_of(&alice()), 900);
        assert_eq!(ledger.custody_balance(), 100);
        assert_eq!(ledger.events(), &[event]);
    }

    #[test]
    fn second_lock_is_rejected_and_record_unchanged() {
        let (mut ledger, clock) = funded_ledger(&[("alice", 1_000)]);
        ledger.lock(&alice(), 100, WEEK).unwrap();
        let before = ledger.get_lock_info(&alice());
        clock.advance(DAY);
        assert_eq!(
            ledger.lock(&alice(), 50, 2 * WEEK),
            Err(LedgerError::AlreadyLocked { account: alice() })
        );
        assert_eq!(ledger.get_lock_info(&alice()), before);
        assert_eq!(ledger.custodian().balance_of(&alice()), 900);
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn early_unlock_is_rejected() {
        let (mut ledger, clock) = funded_ledger(&[("alice", 1_000)]);
        ledger.lock(&alice(), 100, WEEK).unwrap();
        clock.advance(WEEK - 1);
        assert_eq!(
            ledger.unlock(&alice()),
            Err(LedgerError::StillLocked {
                account: alice(),
                unlock_time: START + WEEK,
                now: START + WEEK - 1,
            })
        );
        assert_eq!(ledger.get_lock_info(&alice()).amount, 100);
        assert!(!ledger.is_unlockable(&alice()));
    }

    #[test]
    fn unlock_at_exact_unlock_time_returns_tokens() {
        let (mut ledger, clock) = funded_ledger(&[("alice", 1_000)]);
        ledger.lock(&alice(), 100, WEEK).unwrap();
        let balance_before = ledger.custodian().balance_of(&alice());
        clock.advance(WEEK);
        assert!(ledger.is_unlockable(&alice()));

        let event = ledger.unlock(&alice()).unwrap();
        assert_eq!(
            event,
            LedgerEvent::Unlocked {
                account: alice(),
                amount: 100,
            }
        );
        assert_eq!(ledger.get_lock_info(&alice()).amount, 0);
        assert_eq!(ledger.custodian().balance_of(&alice()), balance_before + 100);
        assert_eq!(ledger.custody_balance(), 0);
        ledger.reconcile().unwrap();
    }

    #[test]
    fn unlock_keeps_previous_cycle_audit_fields() {
        let (mut ledger, clock) = funded_ledger(&[("alice", 1_000)]);
        ledger.lock(&alice(), 100, 2 * WEEK).unwrap();
        clock.advance(2 * WEEK);
        ledger.unlock(&alice()).unwrap();
        let record = ledger.get_lock_info(&alice());
        assert_eq!(record.amount, 0);
        assert_eq!(record.unlock_time, START + 2 * WEEK);
        assert_eq!(record.original_lock_time, 2 * WEEK);

        // The next cycle overwrites them.
        ledger.lock(&alice(), 10, WEEK).unwrap();
        let record = ledger.get_lock_info(&alice());
        assert_eq!(record.unlock_time, START + 3 * WEEK);
        assert_eq!(record.original_lock_time, WEEK);
    }

    #[test]
    fn zero_amount_is_rejected_in_any_state() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 1_000)]);
        assert_eq!(
            ledger.lock(&alice(), 0, WEEK),
            Err(LedgerError::AmountMustBePositive)
        );
        ledger.lock(&alice(), 100, WEEK).unwrap();
        assert_eq!(
            ledger.lock(&alice(), 0, WEEK),
            Err(LedgerError::AmountMustBePositive)
        );
        assert_eq!(
            ledger.lock(&alice(), 0, 0),
            Err(LedgerError::AmountMustBePositive)
        );
    }

    #[test]
    fn short_lock_period_moves_no_tokens() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 1_000)]);
        assert_eq!(
            ledger.lock(&alice(), 100, 3 * DAY),
            Err(LedgerError::LockPeriodTooShort {
                requested: 3 * DAY,
                minimum: WEEK,
            })
        );
        assert_eq!(ledger.custodian().balance_of(&alice()), 1_000);
        assert_eq!(ledger.custody_balance(), 0);
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn unlock_without_lock_is_nothing_to_unlock() {
        let (mut ledger, clock) = funded_ledger(&[("alice", 1_000)]);
        let never = ledger.unlock(&alice()).unwrap_err();
        ledger.lock(&alice(), 100, WEEK).unwrap();
        clock.advance(WEEK);
        ledger.unlock(&alice()).unwrap();
        let again = ledger.unlock(&alice()).unwrap_err();
        assert_eq!(never, again);
        assert_eq!(never, LedgerError::NothingToUnlock { account: alice() });
    }

    #[test]
    fn custody_refusal_leaves_ledger_untouched() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 50)]);
        let err = ledger.lock(&alice(), 100, WEEK).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CustodyTransferFailed(CustodyError::InsufficientAllowance { .. })
        ));
        assert_eq!(ledger.get_lock_info(&alice()), LockRecord::default());
        assert_eq!(ledger.totals(), LedgerTotals::default());
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn overflowing_unlock_time_is_rejected() {
        let (mut ledger, clock) = funded_ledger(&[("alice", 1_000)]);
        clock.set(u64::MAX - WEEK + 1);
        assert!(matches!(
            ledger.lock(&alice(), 1, WEEK),
            Err(LedgerError::TimestampOverflow { .. })
        ));
        assert_eq!(ledger.custody_balance(), 0);
    }

    struct RefusingPush(InMemoryCustodian);

    impl TokenCustodian for RefusingPush {
        fn pull(&mut self, from: &AccountId, amount: Amount) -> Result<(), CustodyError> {
            self.0.pull(from, amount)
        }

        fn push(&mut self, _to: &AccountId, _amount: Amount) -> Result<(), CustodyError> {
            Err(CustodyError::Overflow)
        }

        fn custody_balance(&self) -> Amount {
            self.0.custody_balance()
        }
    }

    #[test]
    fn failed_push_keeps_the_lock() {
        let mut inner = InMemoryCustodian::new();
        inner.mint(&alice(), 100).unwrap();
        inner.approve(&alice(), 100);
        let clock = Arc::new(ManualClock::new(START));
        let config = LedgerConfig::new(RefusingPush(inner), "admin").with_clock(clock.clone());
        let mut ledger = LockLedger::from_config(config).unwrap();

        ledger.lock(&alice(), 100, WEEK).unwrap();
        clock.advance(WEEK);
        assert_eq!(
            ledger.unlock(&alice()),
            Err(LedgerError::CustodyTransferFailed(CustodyError::Overflow))
        );
        assert_eq!(ledger.get_lock_info(&alice()).amount, 100);
        assert_eq!(ledger.totals().withdrawn, 0);
        assert_eq!(ledger.events().len(), 1);
        ledger.reconcile().unwrap();
    }

    #[test]
    fn repeated_rejections_change_nothing() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 1_000), ("bob", 10)]);
        ledger.lock(&alice(), 100, WEEK).unwrap();
        let bob = "bob".to_string();
        let records: Vec<_> = ledger.records().map(|(a, r)| (a.clone(), *r)).collect();
        let custodian = ledger.custodian().clone();
        for _ in 0..5 {
            assert!(ledger.lock(&alice(), 100, WEEK).is_err());
            assert!(ledger.unlock(&alice()).is_err());
            assert!(ledger.unlock(&bob).is_err());
            assert!(ledger.lock(&bob, 11, WEEK).is_err());
            assert!(ledger.lock(&bob, 0, WEEK).is_err());
        }
        let after: Vec<_> = ledger.records().map(|(a, r)| (a.clone(), *r)).collect();
        assert_eq!(records, after);
        assert_eq!(ledger.custodian(), &custodian);
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn drain_events_empties_the_log() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 1_000)]);
        ledger.lock(&alice(), 100, WEEK).unwrap();
        assert_eq!(ledger.drain_events().len(), 1);
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn reconcile_detects_custody_moved_behind_the_ledger() {
        let (mut ledger, _clock) = funded_ledger(&[("alice", 1_000)]);
        ledger.lock(&alice(), 100, WEEK).unwrap();
        ledger.custodian_mut().push(&alice(), 40).unwrap();
        assert!(matches!(
            ledger.reconcile(),
            Err(LedgerError::Imbalance {
                locked: 100,
                custody: 60,
                ..
            })
        ));
    }

    #[test]
    fn totals_track_locks_under_random_traffic() {
        let names = ["a", "b", "c", "d", "e"];
        let accounts: Vec<(&str, Amount)> = names.iter().map(|n| (*n, 10_000)).collect();
        let (mut ledger, clock) = funded_ledger(&accounts);
        let mut rng = StdRng::seed_from_u64(0x71_0c_4ed6);

        for _ in 0..2_000 {
            let account = names[rng.gen_range(0..names.len())].to_string();
            match rng.gen_range(0..3) {
                0 => {
                    let amount = rng.gen_range(0..3_000);
                    let duration = rng.gen_range(WEEK - DAY..3 * WEEK);
                    let _ = ledger.lock(&account, amount, duration);
                }
                1 => {
                    let _ = ledger.unlock(&account);
                }
                _ => clock.advance(rng.gen_range(0..2 * DAY)),
            }
            ledger.reconcile().unwrap();
            let outstanding = ledger.totals().outstanding().unwrap();
            assert_eq!(outstanding, ledger.total_locked());
        }

        let circulating = ledger.custodian().circulating();
        assert_eq!(
            circulating + ledger.custody_balance() as u128,
            10_000 * names.len() as u128
        );
    }
}
