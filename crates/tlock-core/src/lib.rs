//! Core primitives for the tlock custody ledger.
//!
//! The crate is built around one state machine, the [`ledger::LockLedger`],
//! which holds at most one time-lock per account and moves tokens through a
//! pluggable [`custodian::TokenCustodian`]:
//!
//! * [`ledger`] — lock/unlock transitions, lifetime totals and reconciliation.
//! * [`custodian`] — the custody seam plus an in-memory reference custodian.
//! * [`clock`] — the time source read once per operation.
//! * [`config`] — immutable construction-time settings.
//! * [`snapshot`] — serializable ledger images with a SHA-256 state root.
//! * [`participants`] and [`gate`] — the allow-list and the layer that
//!   enforces it in front of the ledger.

pub mod clock;
pub mod config;
pub mod custodian;
pub mod events;
pub mod gate;
pub mod ledger;
pub mod participants;
pub mod snapshot;

mod error;

pub use error::{CustodyError, LedgerError};

pub type AccountId = String;
pub type Amount = u64;
/// Seconds since the Unix epoch.
pub type Timestamp = u64;
/// Length of a lock in seconds.
pub type Duration = u64;
