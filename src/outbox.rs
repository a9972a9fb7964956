//! Side-effect outbox
//!
//! A status transition and its side effects (invoice generation, webhook
//! fan-out) must not drift apart: the ledger records [`OutboxEntry`] rows in
//! the same atomic storage write that flips the status, then nudges the
//! worker through a channel. The worker drains entries with bounded retry
//! and a per-attempt timeout; a periodic sweep picks up entries whose nudge
//! was lost (full channel, crash before send).
//!
//! Side-effect failures never propagate back to the caller that performed
//! the state transition and never roll it back. After the retry budget is
//! exhausted the entry is marked `Failed` and kept for inspection.
//!
//! # Architecture
//!
//! ```text
//! Ledger write (status + outbox rows, one atomic unit)
//!       |
//!       v
//! [Channel nudge] ----> OutboxWorker::run
//!       .                    |  claim (Pending -> InFlight)
//!       .                    v
//! [Periodic sweep] --> process_with_retry
//!                           |
//!              +------------+------------+
//!              v                         v
//!       ensure_invoice            SignedDispatcher::deliver
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::handlers::status::ServiceStats;
use crate::invoice::InvoiceGenerator;
use crate::store::{DisputeStore, OutboxStore, TransactionStore};
use crate::webhook::{EventKind, SignedDispatcher};

/// Size of the worker nudge channel
const OUTBOX_CHANNEL_CAPACITY: usize = 1000;

/// A side effect to perform after a state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    /// Generate the billing artifact for the completed transaction
    GenerateInvoice,
    /// Broadcast `payment.completed` for the completed transaction
    PaymentCompletedEvent,
    /// Broadcast `dispute.resolved` for the given dispute
    DisputeResolvedEvent {
        /// Dispute whose resolution is being announced
        dispute_id: Uuid,
    },
}

/// Processing state of an outbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    /// Recorded, not yet claimed by the worker
    Pending,
    /// Claimed by a worker task
    InFlight,
    /// Processed successfully
    Done,
    /// Retry budget exhausted; kept for inspection
    Failed,
}

/// A durable record of one side effect owed to a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Entry identity
    pub id: Uuid,
    /// Transaction the effect belongs to
    pub transaction_id: Uuid,
    /// What to do
    pub effect: SideEffect,
    /// Attempts consumed so far
    pub attempts: u32,
    /// Processing state
    pub state: OutboxState,
    /// When the entry was recorded
    pub enqueued_at: DateTime<Utc>,
    /// Last failure message, when any attempt failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Create a pending entry
    pub fn new(transaction_id: Uuid, effect: SideEffect) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            effect,
            attempts: 0,
            state: OutboxState::Pending,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }
}

/// The effects owed when a settling transaction reaches `Completed`
pub fn settlement_effects(transaction_id: Uuid) -> Vec<OutboxEntry> {
    vec![
        OutboxEntry::new(transaction_id, SideEffect::GenerateInvoice),
        OutboxEntry::new(transaction_id, SideEffect::PaymentCompletedEvent),
    ]
}

/// Create the nudge channel between state-transition call sites and the worker
pub fn channel() -> (OutboxSender, mpsc::Receiver<OutboxEntry>) {
    let (tx, rx) = mpsc::channel(OUTBOX_CHANNEL_CAPACITY);
    (OutboxSender { tx }, rx)
}

/// Sending half of the outbox nudge channel.
///
/// A failed nudge is not an error: the entry is already durable in the store
/// and the worker sweep will find it.
#[derive(Clone)]
pub struct OutboxSender {
    tx: mpsc::Sender<OutboxEntry>,
}

impl OutboxSender {
    /// Nudge the worker about freshly recorded entries.
    pub fn nudge(&self, entries: &[OutboxEntry]) {
        for entry in entries {
            if let Err(err) = self.tx.try_send(entry.clone()) {
                tracing::warn!(
                    entry_id = %entry.id,
                    transaction_id = %entry.transaction_id,
                    error = %err,
                    "Outbox nudge dropped; sweep will pick the entry up"
                );
            }
        }
    }
}

/// Background worker that drains the outbox.
pub struct OutboxWorker {
    rx: mpsc::Receiver<OutboxEntry>,
    outbox: Arc<dyn OutboxStore>,
    transactions: Arc<dyn TransactionStore>,
    disputes: Arc<dyn DisputeStore>,
    invoices: Arc<InvoiceGenerator>,
    dispatcher: Arc<SignedDispatcher>,
    config: AppConfig,
    stats: Arc<ServiceStats>,
}

impl OutboxWorker {
    /// Assemble a worker. Spawn [`OutboxWorker::run`] as a tokio task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::Receiver<OutboxEntry>,
        outbox: Arc<dyn OutboxStore>,
        transactions: Arc<dyn TransactionStore>,
        disputes: Arc<dyn DisputeStore>,
        invoices: Arc<InvoiceGenerator>,
        dispatcher: Arc<SignedDispatcher>,
        config: AppConfig,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self {
            rx,
            outbox,
            transactions,
            disputes,
            invoices,
            dispatcher,
            config,
            stats,
        }
    }

    /// Run until the nudge channel closes.
    pub async fn run(mut self) {
        tracing::info!("Starting outbox worker");
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        // The first tick fires immediately and drains anything recorded
        // before the worker started.
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(entry) => self.claim_and_spawn(entry.id).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    match self.outbox.pending_entries().await {
                        Ok(entries) => {
                            for entry in entries {
                                self.claim_and_spawn(entry.id).await;
                            }
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Outbox sweep failed");
                        }
                    }
                }
            }
        }
        tracing::info!("Outbox worker shutting down");
    }

    /// Claim an entry (Pending -> InFlight) and process it in its own task.
    /// A lost claim means another path already took the entry.
    async fn claim_and_spawn(&self, entry_id: Uuid) {
        let claimed = match self.outbox.claim(entry_id).await {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::error!(entry_id = %entry_id, error = %err, "Outbox claim failed");
                return;
            }
        };
        let Some(entry) = claimed else { return };

        let ctx = WorkerContext {
            outbox: self.outbox.clone(),
            transactions: self.transactions.clone(),
            disputes: self.disputes.clone(),
            invoices: self.invoices.clone(),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        };
        tokio::spawn(async move {
            process_with_retry(ctx, entry).await;
        });
    }
}

#[derive(Clone)]
struct WorkerContext {
    outbox: Arc<dyn OutboxStore>,
    transactions: Arc<dyn TransactionStore>,
    disputes: Arc<dyn DisputeStore>,
    invoices: Arc<InvoiceGenerator>,
    dispatcher: Arc<SignedDispatcher>,
    config: AppConfig,
    stats: Arc<ServiceStats>,
}

/// Process one entry with bounded retry and a per-attempt timeout.
async fn process_with_retry(ctx: WorkerContext, entry: OutboxEntry) {
    let max_retries = ctx.config.outbox_max_retries;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = ctx.config.retry_delay(attempt - 1);
            tracing::info!(
                entry_id = %entry.id,
                transaction_id = %entry.transaction_id,
                attempt,
                delay_ms = delay.as_millis(),
                "Retrying side effect"
            );
            tokio::time::sleep(delay).await;
        }

        let outcome = timeout(ctx.config.processing_timeout, process_entry(&ctx, &entry))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Delivery(format!(
                    "side effect timed out after {:?}",
                    ctx.config.processing_timeout
                )))
            });

        match outcome {
            Ok(()) => {
                if let Err(err) = ctx.outbox.mark_done(entry.id, attempt + 1).await {
                    tracing::error!(entry_id = %entry.id, error = %err, "Failed to mark outbox entry done");
                }
                return;
            }
            Err(err) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    transaction_id = %entry.transaction_id,
                    attempt = attempt + 1,
                    max_retries,
                    error = %err,
                    "Side effect failed"
                );
                if attempt == max_retries {
                    if let Err(mark_err) = ctx
                        .outbox
                        .mark_failed(entry.id, attempt + 1, &err.to_string())
                        .await
                    {
                        tracing::error!(
                            entry_id = %entry.id,
                            error = %mark_err,
                            "Failed to mark outbox entry failed"
                        );
                    }
                }
            }
        }
    }
}

async fn process_entry(ctx: &WorkerContext, entry: &OutboxEntry) -> Result<()> {
    match &entry.effect {
        SideEffect::GenerateInvoice => {
            let artifact = ctx.invoices.ensure_invoice(entry.transaction_id).await?;
            ctx.stats.record_invoice();
            tracing::info!(
                transaction_id = %entry.transaction_id,
                artifact = %artifact,
                "Invoice ensured"
            );
            Ok(())
        }
        SideEffect::PaymentCompletedEvent => {
            let tx = ctx
                .transactions
                .get(entry.transaction_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found("transaction", entry.transaction_id.to_string())
                })?;
            let data = serde_json::to_value(&tx)?;
            deliver_and_record(ctx, EventKind::PaymentCompleted, data).await
        }
        SideEffect::DisputeResolvedEvent { dispute_id } => {
            let dispute = ctx
                .disputes
                .get(*dispute_id)
                .await?
                .ok_or_else(|| Error::not_found("dispute", dispute_id.to_string()))?;
            let data = serde_json::to_value(&dispute)?;
            deliver_and_record(ctx, EventKind::DisputeResolved, data).await
        }
    }
}

async fn deliver_and_record(
    ctx: &WorkerContext,
    event: EventKind,
    data: serde_json::Value,
) -> Result<()> {
    let started = std::time::Instant::now();
    let outcomes = ctx.dispatcher.deliver(event, data).await?;
    ctx.stats.record_delivery_latency(started.elapsed());
    for outcome in &outcomes {
        ctx.stats.record_delivery_outcome(outcome);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_effects_cover_invoice_and_event() {
        let tx_id = Uuid::new_v4();
        let effects = settlement_effects(tx_id);
        assert_eq!(effects.len(), 2);
        assert!(effects.iter().all(|e| e.transaction_id == tx_id));
        assert!(effects.iter().all(|e| e.state == OutboxState::Pending));
        assert!(effects
            .iter()
            .any(|e| e.effect == SideEffect::GenerateInvoice));
        assert!(effects
            .iter()
            .any(|e| e.effect == SideEffect::PaymentCompletedEvent));
    }

    #[test]
    fn test_nudge_without_receiver_is_harmless() {
        let (sender, rx) = channel();
        drop(rx);
        // Entry stays Pending in the store; the sweep owns it from here.
        sender.nudge(&settlement_effects(Uuid::new_v4()));
    }

    #[test]
    fn test_side_effect_serde_tagging() {
        let effect = SideEffect::DisputeResolvedEvent {
            dispute_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&effect).unwrap();
        assert!(json.contains("\"effect\":\"dispute_resolved_event\""));
        let back: SideEffect = serde_json::from_str(&json).unwrap();
        assert_eq!(back, effect);
    }
}
