//! Transaction ledger
//!
//! The state machine at the center of the payment subsystem. The ledger owns
//! transaction transitions, enforces the dispute gate on fund release, and
//! records completion side effects (invoice generation, `payment.completed`
//! fan-out) in the outbox as part of the same storage write that flips the
//! status.

pub mod service;
pub mod types;

pub use service::{ReleaseOutcome, TransactionLedger};
pub use types::{
    NewTransaction, Transaction, TransactionKind, TransactionPatch, TransactionStatus,
};
