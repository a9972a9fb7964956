//! Transaction lifecycle service

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dispute::DisputeLedger;
use crate::error::{Error, Result};
use crate::ledger::types::{NewTransaction, Transaction, TransactionPatch, TransactionStatus};
use crate::lookup::{ProjectCatalog, UserDirectory};
use crate::outbox::{settlement_effects, OutboxEntry, OutboxSender};
use crate::store::{CompleteOutcome, TransactionStore};

/// Result of a `release_funds` call.
///
/// Only `Released` mutates state. The other variants are idempotent status
/// information, deliberately modeled as successful outcomes so callers can
/// retry without special-casing errors.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The transaction transitioned Pending -> Completed
    Released {
        /// The updated record
        transaction: Transaction,
    },
    /// The transaction was not pending; nothing changed
    AlreadyReleased {
        /// The unchanged record
        transaction: Transaction,
    },
    /// An unresolved dispute gates the release; nothing changed
    BlockedByDispute {
        /// The unchanged record
        transaction: Transaction,
        /// The dispute holding the gate
        dispute_id: Uuid,
    },
}

impl ReleaseOutcome {
    /// Whether this call performed the transition
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. })
    }
}

/// The transaction state machine and its side-effect wiring
pub struct TransactionLedger {
    store: Arc<dyn TransactionStore>,
    disputes: Arc<DisputeLedger>,
    users: Arc<dyn UserDirectory>,
    projects: Arc<dyn ProjectCatalog>,
    outbox: OutboxSender,
}

impl TransactionLedger {
    /// Assemble the service from its collaborators
    pub fn new(
        store: Arc<dyn TransactionStore>,
        disputes: Arc<DisputeLedger>,
        users: Arc<dyn UserDirectory>,
        projects: Arc<dyn ProjectCatalog>,
        outbox: OutboxSender,
    ) -> Self {
        Self {
            store,
            disputes,
            users,
            projects,
            outbox,
        }
    }

    /// Create a transaction.
    ///
    /// Referenced parties and project must exist; the external reference
    /// must be unused. A transaction created directly in `Completed` status
    /// gets `completed_at` stamped and, for settling kinds, its completion
    /// side effects recorded immediately.
    #[instrument(skip(self, input), fields(external_reference = %input.external_reference))]
    pub async fn create(&self, input: NewTransaction) -> Result<Transaction> {
        input.validate()?;

        if self.users.find_by_id(&input.from_party).await?.is_none() {
            return Err(Error::not_found("user", input.from_party.clone()));
        }
        if self.users.find_by_id(&input.to_party).await?.is_none() {
            return Err(Error::not_found("user", input.to_party.clone()));
        }
        if self.projects.find_by_id(&input.project).await?.is_none() {
            return Err(Error::not_found("project", input.project.clone()));
        }

        let tx = input.into_transaction(Utc::now());
        let effects = self.completion_effects(&tx, tx.status == TransactionStatus::Completed);
        let tx = self.store.insert(tx, effects.clone()).await?;
        self.outbox.nudge(&effects);

        info!(transaction_id = %tx.id, kind = %tx.kind.as_str(), status = %tx.status, "Transaction created");
        Ok(tx)
    }

    /// Fetch a transaction by id.
    pub async fn get(&self, id: Uuid) -> Result<Transaction> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("transaction", id.to_string()))
    }

    /// All transactions, oldest first.
    pub async fn list(&self) -> Result<Vec<Transaction>> {
        self.store.list().await
    }

    /// Apply a partial update.
    ///
    /// Status overwrites are unrestricted; `completed_at` follows the
    /// resulting status in both directions, and a transition into
    /// `Completed` records the completion side effects.
    #[instrument(skip(self, patch), fields(transaction_id = %id))]
    pub async fn update(&self, id: Uuid, patch: TransactionPatch) -> Result<Transaction> {
        patch.validate()?;

        let mut tx = self.get(id).await?;
        let was_completed = tx.status == TransactionStatus::Completed;
        patch.apply(&mut tx);
        let now_completed = tx.status == TransactionStatus::Completed;

        if now_completed && !was_completed {
            tx.completed_at = Some(Utc::now());
        } else if !now_completed && was_completed {
            // Keep the "completed_at iff completed" invariant when a
            // correction moves the record back out of Completed.
            tx.completed_at = None;
        }

        let effects = self.completion_effects(&tx, now_completed && !was_completed);
        let tx = self.store.overwrite(tx, effects.clone()).await?;
        self.outbox.nudge(&effects);

        info!(status = %tx.status, "Transaction updated");
        Ok(tx)
    }

    /// The gated Pending -> Completed transition.
    ///
    /// Release is permitted only when no dispute exists or the most recent
    /// dispute is resolved. The swap itself is a compare-and-swap in the
    /// store; of two concurrent callers exactly one observes `Released`.
    #[instrument(skip(self), fields(transaction_id = %id))]
    pub async fn release_funds(&self, id: Uuid) -> Result<ReleaseOutcome> {
        let tx = self.get(id).await?;

        if tx.status != TransactionStatus::Pending {
            return Ok(ReleaseOutcome::AlreadyReleased { transaction: tx });
        }

        if let Some(dispute) = self.disputes.latest_for_transaction(id).await? {
            if !dispute.status.permits_release() {
                info!(dispute_id = %dispute.id, dispute_status = %dispute.status, "Release blocked by dispute");
                return Ok(ReleaseOutcome::BlockedByDispute {
                    transaction: tx,
                    dispute_id: dispute.id,
                });
            }
        }

        let effects = self.completion_effects(&tx, true);
        match self
            .store
            .complete_if_pending(id, Utc::now(), effects.clone())
            .await?
        {
            CompleteOutcome::Completed(tx) => {
                self.outbox.nudge(&effects);
                info!("Funds released");
                Ok(ReleaseOutcome::Released { transaction: tx })
            }
            CompleteOutcome::NotPending(tx) => {
                // A concurrent caller won the swap.
                Ok(ReleaseOutcome::AlreadyReleased { transaction: tx })
            }
            CompleteOutcome::Missing => Err(Error::not_found("transaction", id.to_string())),
        }
    }

    /// Administrative hard delete, bypassing the state machine.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.store.delete(id).await? {
            warn!(transaction_id = %id, "Transaction hard-deleted");
            Ok(())
        } else {
            Err(Error::not_found("transaction", id.to_string()))
        }
    }

    /// The outbox entries owed when `tx` completes, or none when the
    /// transition does not settle.
    fn completion_effects(&self, tx: &Transaction, completing: bool) -> Vec<OutboxEntry> {
        if completing && tx.kind.settles() {
            settlement_effects(tx.id)
        } else {
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispute::{DisputeStatus, NewDispute};
    use crate::ledger::types::TransactionKind;
    use crate::lookup::{InMemoryProjectCatalog, InMemoryUserDirectory};
    use crate::outbox::{self, SideEffect};
    use crate::store::{InMemoryStore, OutboxStore};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: TransactionLedger,
        disputes: Arc<DisputeLedger>,
        store: Arc<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        users.seed("u-buyer");
        users.seed("u-seller");
        let projects = Arc::new(InMemoryProjectCatalog::new());
        projects.seed("p-site");
        let (outbox_tx, _outbox_rx) = outbox::channel();

        let disputes = Arc::new(DisputeLedger::new(
            store.clone(),
            store.clone(),
            users.clone(),
            outbox_tx.clone(),
        ));
        let ledger = TransactionLedger::new(
            store.clone(),
            disputes.clone(),
            users,
            projects,
            outbox_tx,
        );
        Fixture {
            ledger,
            disputes,
            store,
        }
    }

    fn deposit(external_reference: &str) -> NewTransaction {
        NewTransaction {
            from_party: "u-buyer".to_string(),
            to_party: "u-seller".to_string(),
            project: "p-site".to_string(),
            amount: Decimal::new(100, 0),
            currency: "USD".to_string(),
            external_reference: external_reference.to_string(),
            kind: TransactionKind::EscrowDeposit,
            status: None,
        }
    }

    #[tokio::test]
    async fn test_create_validates_references() {
        let fx = fixture();

        let mut input = deposit("0x1");
        input.from_party = "u-ghost".to_string();
        let err = fx.ledger.create(input).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { resource: "user", .. }));

        let mut input = deposit("0x1");
        input.project = "p-ghost".to_string();
        let err = fx.ledger.create(input).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { resource: "project", .. }));
    }

    #[tokio::test]
    async fn test_duplicate_external_reference_is_conflict() {
        let fx = fixture();
        fx.ledger.create(deposit("0xsame")).await.unwrap();
        let err = fx.ledger.create(deposit("0xsame")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_release_once_then_idempotent() {
        let fx = fixture();
        let tx = fx.ledger.create(deposit("0x2")).await.unwrap();

        let first = fx.ledger.release_funds(tx.id).await.unwrap();
        let ReleaseOutcome::Released { transaction } = first else {
            panic!("expected Released");
        };
        assert_eq!(transaction.status, TransactionStatus::Completed);
        assert!(transaction.completed_at.is_some());

        let second = fx.ledger.release_funds(tx.id).await.unwrap();
        assert!(matches!(second, ReleaseOutcome::AlreadyReleased { .. }));

        // No duplicate side effects from the idempotent call
        let entries = fx.store.entries_for_transaction(tx.id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_release_blocked_by_pending_dispute() {
        let fx = fixture();
        let tx = fx.ledger.create(deposit("0x3")).await.unwrap();
        let dispute = fx
            .disputes
            .create(NewDispute {
                transaction_id: tx.id,
                raised_by: "u-buyer".to_string(),
                reason: "deliverable missing".to_string(),
            })
            .await
            .unwrap();

        let outcome = fx.ledger.release_funds(tx.id).await.unwrap();
        let ReleaseOutcome::BlockedByDispute {
            transaction,
            dispute_id,
        } = outcome
        else {
            panic!("expected BlockedByDispute");
        };
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert_eq!(dispute_id, dispute.id);
        assert!(fx.store.entries_for_transaction(tx.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_blocked_by_rejected_dispute() {
        let fx = fixture();
        let tx = fx.ledger.create(deposit("0x4")).await.unwrap();
        let dispute = fx
            .disputes
            .create(NewDispute {
                transaction_id: tx.id,
                raised_by: "u-buyer".to_string(),
                reason: "scope disagreement".to_string(),
            })
            .await
            .unwrap();
        fx.disputes
            .resolve(dispute.id, DisputeStatus::Rejected)
            .await
            .unwrap();

        let outcome = fx.ledger.release_funds(tx.id).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::BlockedByDispute { .. }));
    }

    #[tokio::test]
    async fn test_release_permitted_after_resolution() {
        let fx = fixture();
        let tx = fx.ledger.create(deposit("0x5")).await.unwrap();
        let dispute = fx
            .disputes
            .create(NewDispute {
                transaction_id: tx.id,
                raised_by: "u-buyer".to_string(),
                reason: "late delivery".to_string(),
            })
            .await
            .unwrap();
        fx.disputes
            .resolve(dispute.id, DisputeStatus::Resolved)
            .await
            .unwrap();

        let outcome = fx.ledger.release_funds(tx.id).await.unwrap();
        assert!(outcome.is_released());
    }

    #[tokio::test]
    async fn test_release_missing_transaction() {
        let fx = fixture();
        let err = fx.ledger.release_funds(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_release_has_one_winner() {
        let fx = fixture();
        let fx = Arc::new(fx);
        let tx = fx.ledger.create(deposit("0x6")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            handles.push(tokio::spawn(async move {
                fx.ledger.release_funds(tx.id).await.unwrap()
            }));
        }
        let mut released = 0;
        for handle in handles {
            if handle.await.unwrap().is_released() {
                released += 1;
            }
        }
        assert_eq!(released, 1);

        let entries = fx.store.entries_for_transaction(tx.id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_create_completed_runs_pipeline_for_settling_kind() {
        let fx = fixture();
        let mut input = deposit("0x7");
        input.kind = TransactionKind::Payment;
        input.status = Some(TransactionStatus::Completed);

        let tx = fx.ledger.create(input).await.unwrap();
        assert!(tx.completed_at.is_some());
        let entries = fx.store.entries_for_transaction(tx.id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_deposit_completion_has_no_settlement_effects() {
        let fx = fixture();
        let mut input = deposit("0x8");
        input.status = Some(TransactionStatus::Completed);

        let tx = fx.ledger.create(input).await.unwrap();
        assert!(tx.completed_at.is_some());
        assert!(fx.store.entries_for_transaction(tx.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_into_completed_stamps_and_enqueues() {
        let fx = fixture();
        let mut input = deposit("0x9");
        input.kind = TransactionKind::EscrowRelease;
        let tx = fx.ledger.create(input).await.unwrap();

        let patch = TransactionPatch {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let updated = fx.ledger.update(tx.id, patch).await.unwrap();
        assert_eq!(updated.status, TransactionStatus::Completed);
        assert!(updated.completed_at.is_some());
        let entries = fx.store.entries_for_transaction(tx.id).await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.effect == SideEffect::PaymentCompletedEvent));
    }

    #[tokio::test]
    async fn test_update_out_of_completed_clears_timestamp() {
        let fx = fixture();
        let mut input = deposit("0x10");
        input.status = Some(TransactionStatus::Completed);
        let tx = fx.ledger.create(input).await.unwrap();

        let patch = TransactionPatch {
            status: Some(TransactionStatus::Pending),
            ..Default::default()
        };
        let updated = fx.ledger.update(tx.id, patch).await.unwrap();
        assert_eq!(updated.status, TransactionStatus::Pending);
        assert!(updated.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_bad_amount() {
        let fx = fixture();
        let tx = fx.ledger.create(deposit("0x11")).await.unwrap();
        let patch = TransactionPatch {
            amount: Some(Decimal::ZERO),
            ..Default::default()
        };
        let err = fx.ledger.update(tx.id, patch).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let fx = fixture();
        let tx = fx.ledger.create(deposit("0x12")).await.unwrap();
        fx.ledger.delete(tx.id).await.unwrap();
        let err = fx.ledger.get(tx.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
