//! Payflow - Payment-Transaction Lifecycle Service
//!
//! This crate implements the payment subsystem of a marketplace backend: a
//! value-transfer ledger whose completion is gated by an independent dispute
//! process, an idempotent invoice trigger, and a signed best-effort webhook
//! fan-out to third-party subscribers.
//!
//! # Features
//!
//! - **Transaction Ledger**: the state machine owning every transition, with
//!   the dispute gate enforced on fund release
//! - **Dispute Ledger**: dispute lifecycle and the single release-permission
//!   query the ledger depends on
//! - **Invoice Trigger**: completed transaction to billing artifact, exactly
//!   once, behind external renderer/blob-store traits
//! - **Signed Dispatcher**: HMAC-SHA256-signed concurrent webhook fan-out
//!   with an SSRF guard on every target
//! - **Outbox Worker**: side effects recorded durably with the state change,
//!   drained in the background with bounded retry
//!
//! # Architecture
//!
//! ```text
//! API caller ──▶ Transaction Ledger ──▶ Dispute Ledger (release gate)
//!                      │
//!                      ▼  status write + outbox rows, one atomic unit
//!                ┌───────────┐
//!                │  Outbox   │
//!                └─────┬─────┘
//!                      ▼  background worker, bounded retry
//!         ┌────────────┴────────────┐
//!         ▼                         ▼
//!   Invoice Trigger          Signed Dispatcher
//!   (renderer + blobs)       (HMAC fan-out + SSRF guard)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use payflow::config::AppConfig;
//! use payflow::store::InMemoryStore;
//! use payflow::webhook::{SignedDispatcher, DispatcherConfig};
//!
//! # fn main() -> payflow::Result<()> {
//! let config = AppConfig::with_secret("a-shared-secret-at-least-32-chars")?;
//! let store = Arc::new(InMemoryStore::new());
//! let dispatcher = SignedDispatcher::new(DispatcherConfig::from(&config), store)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod cors;
pub mod dispute;
pub mod error;
pub mod handlers;
pub mod invoice;
pub mod ledger;
pub mod lookup;
pub mod outbox;
pub mod store;
pub mod webhook;

// Re-exports for convenience
pub use config::AppConfig;
pub use dispute::{Dispute, DisputeLedger, DisputeStatus};
pub use error::{Error, Result};
pub use invoice::InvoiceGenerator;
pub use ledger::{ReleaseOutcome, Transaction, TransactionLedger};
pub use webhook::{SignedDispatcher, SubscriptionRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
