//! Storage layer
//!
//! Trait-based storage for transactions, disputes, webhook subscriptions and
//! the side-effect outbox, with an in-memory implementation. The store is
//! the single source of truth; every gated transition is expressed as a
//! single compare-and-swap operation so concurrent callers race on the store
//! instead of on a read-then-write gap:
//!
//! - [`TransactionStore::complete_if_pending`] flips Pending -> Completed and
//!   appends the outbox entries in one atomic unit
//! - [`TransactionStore::claim_invoice_ref`] sets the invoice artifact at
//!   most once
//! - [`DisputeStore::swap_status`] rejects redundant writes and records the
//!   resolution event atomically

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::dispute::{Dispute, DisputeStatus};
use crate::error::{Error, Result};
use crate::ledger::{Transaction, TransactionStatus};
use crate::outbox::{OutboxEntry, OutboxState};
use crate::webhook::{EventKind, Subscription};

/// Result of a conditional Pending -> Completed swap
#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    /// The swap won; the record now carries `Completed` and `completed_at`
    Completed(Transaction),
    /// The record was not `Pending`; returned unchanged
    NotPending(Transaction),
    /// No such record
    Missing,
}

/// Result of a set-once invoice reference claim
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller's artifact was recorded
    Claimed(String),
    /// Another caller got there first; their artifact is returned
    AlreadySet(String),
    /// No such record
    Missing,
}

/// Result of a conditional dispute status swap
#[derive(Debug, Clone)]
pub enum SwapOutcome {
    /// Status changed; `updated_at` was stamped
    Updated(Dispute),
    /// The new status equals the current one; nothing written
    Unchanged(Dispute),
    /// No such record
    Missing,
}

/// Transaction row storage
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction together with any completion side effects.
    /// Fails with [`Error::Conflict`] when the external reference is taken.
    async fn insert(&self, tx: Transaction, effects: Vec<OutboxEntry>) -> Result<Transaction>;

    /// Fetch by id.
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// All transactions, oldest first.
    async fn list(&self) -> Result<Vec<Transaction>>;

    /// Replace an existing row, recording side effects in the same unit.
    /// Fails with [`Error::NotFound`] when the row is absent.
    async fn overwrite(&self, tx: Transaction, effects: Vec<OutboxEntry>) -> Result<Transaction>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Atomically flip Pending -> Completed, stamp `completed_at` and append
    /// the given outbox entries. Anything other than Pending loses the swap.
    async fn complete_if_pending(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        effects: Vec<OutboxEntry>,
    ) -> Result<CompleteOutcome>;

    /// Atomically set `invoice_ref` if it is unset.
    async fn claim_invoice_ref(&self, id: Uuid, artifact: &str) -> Result<ClaimOutcome>;
}

/// Dispute row storage
#[async_trait]
pub trait DisputeStore: Send + Sync {
    /// Insert a new dispute.
    async fn insert(&self, dispute: Dispute) -> Result<Dispute>;

    /// Fetch by id.
    async fn get(&self, id: Uuid) -> Result<Option<Dispute>>;

    /// All disputes, oldest first.
    async fn list(&self) -> Result<Vec<Dispute>>;

    /// The most recently raised dispute for a transaction, if any.
    async fn latest_for_transaction(&self, transaction_id: Uuid) -> Result<Option<Dispute>>;

    /// Atomically swap the status unless it already equals `new_status`,
    /// appending the given outbox entries when the swap happens.
    async fn swap_status(
        &self,
        id: Uuid,
        new_status: DisputeStatus,
        now: DateTime<Utc>,
        effects: Vec<OutboxEntry>,
    ) -> Result<SwapOutcome>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Webhook subscription storage
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new subscription.
    async fn insert(&self, subscription: Subscription) -> Result<Subscription>;

    /// All subscriptions, oldest first.
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Subscriptions whose event set contains `event`.
    async fn matching(&self, event: EventKind) -> Result<Vec<Subscription>>;
}

/// Side-effect outbox storage
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim an entry for processing (Pending -> InFlight). Returns `None`
    /// when the entry is absent or already claimed.
    async fn claim(&self, id: Uuid) -> Result<Option<OutboxEntry>>;

    /// Entries still waiting to be claimed, oldest first.
    async fn pending_entries(&self) -> Result<Vec<OutboxEntry>>;

    /// All entries recorded for a transaction, oldest first.
    async fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<OutboxEntry>>;

    /// Mark an entry processed.
    async fn mark_done(&self, id: Uuid, attempts: u32) -> Result<()>;

    /// Mark an entry permanently failed.
    async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str) -> Result<()>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
struct Inner {
    transactions: HashMap<Uuid, Transaction>,
    // Uniqueness index: external_reference -> transaction id
    external_refs: HashMap<String, Uuid>,
    disputes: HashMap<Uuid, Dispute>,
    subscriptions: HashMap<Uuid, Subscription>,
    outbox: HashMap<Uuid, OutboxEntry>,
}

impl Inner {
    fn append_outbox(&mut self, effects: Vec<OutboxEntry>) {
        for entry in effects {
            self.outbox.insert(entry.id, entry);
        }
    }
}

/// In-memory store backing all aggregates behind one mutex, so that a
/// status write and its outbox rows land in a single critical section.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, tx: Transaction, effects: Vec<OutboxEntry>) -> Result<Transaction> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.external_refs.get(&tx.external_reference) {
            if *existing != tx.id {
                return Err(Error::conflict(format!(
                    "external reference already exists: {}",
                    tx.external_reference
                )));
            }
        }
        inner.external_refs.insert(tx.external_reference.clone(), tx.id);
        inner.transactions.insert(tx.id, tx.clone());
        inner.append_outbox(effects);
        Ok(tx)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.inner.lock().transactions.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Transaction>> {
        let inner = self.inner.lock();
        let mut all: Vec<Transaction> = inner.transactions.values().cloned().collect();
        all.sort_by_key(|tx| tx.created_at);
        Ok(all)
    }

    async fn overwrite(&self, tx: Transaction, effects: Vec<OutboxEntry>) -> Result<Transaction> {
        let mut inner = self.inner.lock();
        let Some(existing) = inner.transactions.get(&tx.id) else {
            return Err(Error::not_found("transaction", tx.id.to_string()));
        };
        if existing.external_reference != tx.external_reference {
            if let Some(holder) = inner.external_refs.get(&tx.external_reference) {
                if *holder != tx.id {
                    return Err(Error::conflict(format!(
                        "external reference already exists: {}",
                        tx.external_reference
                    )));
                }
            }
            let old_ref = existing.external_reference.clone();
            inner.external_refs.remove(&old_ref);
            inner.external_refs.insert(tx.external_reference.clone(), tx.id);
        }
        inner.transactions.insert(tx.id, tx.clone());
        inner.append_outbox(effects);
        Ok(tx)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.transactions.remove(&id) {
            Some(tx) => {
                inner.external_refs.remove(&tx.external_reference);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_if_pending(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        effects: Vec<OutboxEntry>,
    ) -> Result<CompleteOutcome> {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.transactions.get_mut(&id) else {
            return Ok(CompleteOutcome::Missing);
        };
        if tx.status != TransactionStatus::Pending {
            return Ok(CompleteOutcome::NotPending(tx.clone()));
        }
        tx.status = TransactionStatus::Completed;
        tx.completed_at = Some(now);
        let updated = tx.clone();
        inner.append_outbox(effects);
        Ok(CompleteOutcome::Completed(updated))
    }

    async fn claim_invoice_ref(&self, id: Uuid, artifact: &str) -> Result<ClaimOutcome> {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.transactions.get_mut(&id) else {
            return Ok(ClaimOutcome::Missing);
        };
        match &tx.invoice_ref {
            Some(existing) => Ok(ClaimOutcome::AlreadySet(existing.clone())),
            None => {
                tx.invoice_ref = Some(artifact.to_string());
                Ok(ClaimOutcome::Claimed(artifact.to_string()))
            }
        }
    }
}

#[async_trait]
impl DisputeStore for InMemoryStore {
    async fn insert(&self, dispute: Dispute) -> Result<Dispute> {
        self.inner.lock().disputes.insert(dispute.id, dispute.clone());
        Ok(dispute)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Dispute>> {
        Ok(self.inner.lock().disputes.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Dispute>> {
        let inner = self.inner.lock();
        let mut all: Vec<Dispute> = inner.disputes.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        Ok(all)
    }

    async fn latest_for_transaction(&self, transaction_id: Uuid) -> Result<Option<Dispute>> {
        let inner = self.inner.lock();
        Ok(inner
            .disputes
            .values()
            .filter(|d| d.transaction_id == transaction_id)
            .max_by_key(|d| (d.created_at, d.id))
            .cloned())
    }

    async fn swap_status(
        &self,
        id: Uuid,
        new_status: DisputeStatus,
        now: DateTime<Utc>,
        effects: Vec<OutboxEntry>,
    ) -> Result<SwapOutcome> {
        let mut inner = self.inner.lock();
        let Some(dispute) = inner.disputes.get_mut(&id) else {
            return Ok(SwapOutcome::Missing);
        };
        if dispute.status == new_status {
            return Ok(SwapOutcome::Unchanged(dispute.clone()));
        }
        dispute.status = new_status;
        dispute.updated_at = now;
        let updated = dispute.clone();
        inner.append_outbox(effects);
        Ok(SwapOutcome::Updated(updated))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.lock().disputes.remove(&id).is_some())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn insert(&self, subscription: Subscription) -> Result<Subscription> {
        self.inner
            .lock()
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let inner = self.inner.lock();
        let mut all: Vec<Subscription> = inner.subscriptions.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    async fn matching(&self, event: EventKind) -> Result<Vec<Subscription>> {
        let inner = self.inner.lock();
        let mut matched: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.events.contains(&event))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);
        Ok(matched)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim(&self, id: Uuid) -> Result<Option<OutboxEntry>> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.outbox.get_mut(&id) else {
            return Ok(None);
        };
        if entry.state != OutboxState::Pending {
            return Ok(None);
        }
        entry.state = OutboxState::InFlight;
        Ok(Some(entry.clone()))
    }

    async fn pending_entries(&self) -> Result<Vec<OutboxEntry>> {
        let inner = self.inner.lock();
        let mut pending: Vec<OutboxEntry> = inner
            .outbox
            .values()
            .filter(|e| e.state == OutboxState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.enqueued_at);
        Ok(pending)
    }

    async fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<OutboxEntry>> {
        let inner = self.inner.lock();
        let mut entries: Vec<OutboxEntry> = inner
            .outbox
            .values()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.enqueued_at);
        Ok(entries)
    }

    async fn mark_done(&self, id: Uuid, attempts: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .outbox
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("outbox entry vanished: {id}")))?;
        entry.state = OutboxState::Done;
        entry.attempts = attempts;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .outbox
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("outbox entry vanished: {id}")))?;
        entry.state = OutboxState::Failed;
        entry.attempts = attempts;
        entry.last_error = Some(error.to_string());
        Ok(())
    }
}
