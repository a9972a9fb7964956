//! Dispute ledger
//!
//! Disputes are raised against transactions and gate fund release: a
//! transaction may only be released when it has no dispute, or when its most
//! recent dispute is resolved. Both `pending` and `rejected` disputes block.
//!
//! The only transition guard is the redundant-write check: setting a dispute
//! to its current status is a [`crate::error::Error::Conflict`]. A rejected
//! dispute can still move to resolved and back; the service does not impose
//! a terminal-state model on top of that.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lookup::UserDirectory;
use crate::outbox::{OutboxEntry, OutboxSender, SideEffect};
use crate::store::{DisputeStore, SwapOutcome, TransactionStore};

/// Lifecycle status of a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    /// Raised, not yet decided
    Pending,
    /// Decided in a way that unblocks release
    Resolved,
    /// Decided against the raiser; still blocks release
    Rejected,
}

impl DisputeStatus {
    /// String form used on the wire and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    /// Whether this status permits fund release
    pub fn permits_release(&self) -> bool {
        matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dispute raised against a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    /// Dispute identity
    pub id: Uuid,
    /// The transaction under dispute
    pub transaction_id: Uuid,
    /// User who raised the dispute
    pub raised_by: String,
    /// Free-text reason
    pub reason: String,
    /// Lifecycle status
    pub status: DisputeStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last status-change timestamp
    pub updated_at: DateTime<Utc>,
}

/// Input for raising a dispute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDispute {
    /// The transaction under dispute
    pub transaction_id: Uuid,
    /// User raising the dispute
    pub raised_by: String,
    /// Free-text reason
    pub reason: String,
}

impl NewDispute {
    fn validate(&self) -> Result<()> {
        if self.raised_by.trim().is_empty() {
            return Err(Error::validation("raised_by cannot be empty"));
        }
        if self.reason.trim().is_empty() {
            return Err(Error::validation("reason cannot be empty"));
        }
        Ok(())
    }
}

/// Dispute lifecycle service
pub struct DisputeLedger {
    store: Arc<dyn DisputeStore>,
    transactions: Arc<dyn TransactionStore>,
    users: Arc<dyn UserDirectory>,
    outbox: OutboxSender,
}

impl DisputeLedger {
    /// Assemble the service from its collaborators
    pub fn new(
        store: Arc<dyn DisputeStore>,
        transactions: Arc<dyn TransactionStore>,
        users: Arc<dyn UserDirectory>,
        outbox: OutboxSender,
    ) -> Self {
        Self {
            store,
            transactions,
            users,
            outbox,
        }
    }

    /// Raise a dispute against an existing transaction.
    #[instrument(skip(self, input), fields(transaction_id = %input.transaction_id))]
    pub async fn create(&self, input: NewDispute) -> Result<Dispute> {
        input.validate()?;

        if self.transactions.get(input.transaction_id).await?.is_none() {
            return Err(Error::not_found(
                "transaction",
                input.transaction_id.to_string(),
            ));
        }
        if self.users.find_by_id(&input.raised_by).await?.is_none() {
            return Err(Error::not_found("user", input.raised_by.clone()));
        }

        let now = Utc::now();
        let dispute = Dispute {
            id: Uuid::new_v4(),
            transaction_id: input.transaction_id,
            raised_by: input.raised_by,
            reason: input.reason,
            status: DisputeStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let dispute = self.store.insert(dispute).await?;
        info!(dispute_id = %dispute.id, "Dispute raised");
        Ok(dispute)
    }

    /// Fetch a dispute by id.
    pub async fn get(&self, id: Uuid) -> Result<Dispute> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("dispute", id.to_string()))
    }

    /// All disputes, oldest first.
    pub async fn list(&self) -> Result<Vec<Dispute>> {
        self.store.list().await
    }

    /// Move a dispute to a new status.
    ///
    /// Setting the current status again is rejected as a redundant write.
    /// A move to `Resolved` records a `dispute.resolved` broadcast in the
    /// outbox as part of the same storage write.
    #[instrument(skip(self), fields(dispute_id = %id, new_status = %new_status))]
    pub async fn resolve(&self, id: Uuid, new_status: DisputeStatus) -> Result<Dispute> {
        let effects = if new_status == DisputeStatus::Resolved {
            // transaction_id is only known after the load inside the swap;
            // fetch it up front for the outbox entry.
            match self.store.get(id).await? {
                Some(dispute) => vec![OutboxEntry::new(
                    dispute.transaction_id,
                    SideEffect::DisputeResolvedEvent { dispute_id: id },
                )],
                None => return Err(Error::not_found("dispute", id.to_string())),
            }
        } else {
            vec![]
        };

        match self
            .store
            .swap_status(id, new_status, Utc::now(), effects.clone())
            .await?
        {
            SwapOutcome::Updated(dispute) => {
                self.outbox.nudge(&effects);
                info!(status = %dispute.status, "Dispute status changed");
                Ok(dispute)
            }
            SwapOutcome::Unchanged(dispute) => Err(Error::conflict(format!(
                "dispute already has status {}",
                dispute.status
            ))),
            SwapOutcome::Missing => Err(Error::not_found("dispute", id.to_string())),
        }
    }

    /// Whether fund release for this transaction is currently blocked.
    ///
    /// True iff the most recent dispute exists and is not resolved.
    pub async fn is_release_blocked(&self, transaction_id: Uuid) -> Result<bool> {
        Ok(self
            .store
            .latest_for_transaction(transaction_id)
            .await?
            .map(|d| !d.status.permits_release())
            .unwrap_or(false))
    }

    /// The most recent dispute for a transaction, if any.
    pub async fn latest_for_transaction(&self, transaction_id: Uuid) -> Result<Option<Dispute>> {
        self.store.latest_for_transaction(transaction_id).await
    }

    /// Administrative hard delete, bypassing the lifecycle.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(Error::not_found("dispute", id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{NewTransaction, TransactionKind};
    use crate::lookup::InMemoryUserDirectory;
    use crate::outbox;
    use crate::store::InMemoryStore;
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: DisputeLedger,
        store: Arc<InMemoryStore>,
        transaction_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        users.seed("u-buyer");
        let (outbox_tx, _outbox_rx) = outbox::channel();

        let tx = NewTransaction {
            from_party: "u-buyer".to_string(),
            to_party: "u-seller".to_string(),
            project: "p-1".to_string(),
            amount: Decimal::new(100, 0),
            currency: "USD".to_string(),
            external_reference: "0xfixture".to_string(),
            kind: TransactionKind::EscrowDeposit,
            status: None,
        }
        .into_transaction(Utc::now());
        let tx = TransactionStore::insert(store.as_ref(), tx, vec![])
            .await
            .unwrap();

        let ledger = DisputeLedger::new(
            store.clone(),
            store.clone(),
            users,
            outbox_tx,
        );
        Fixture {
            ledger,
            store,
            transaction_id: tx.id,
        }
    }

    fn new_dispute(transaction_id: Uuid) -> NewDispute {
        NewDispute {
            transaction_id,
            raised_by: "u-buyer".to_string(),
            reason: "work not delivered".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let fx = fixture().await;
        let dispute = fx.ledger.create(new_dispute(fx.transaction_id)).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Pending);
        assert!(fx.ledger.is_release_blocked(fx.transaction_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_transaction() {
        let fx = fixture().await;
        let err = fx.ledger.create(new_dispute(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { resource: "transaction", .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_user() {
        let fx = fixture().await;
        let mut input = new_dispute(fx.transaction_id);
        input.raised_by = "u-ghost".to_string();
        let err = fx.ledger.create(input).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { resource: "user", .. }));
    }

    #[tokio::test]
    async fn test_resolve_no_op_is_conflict() {
        let fx = fixture().await;
        let dispute = fx.ledger.create(new_dispute(fx.transaction_id)).await.unwrap();
        let err = fx
            .ledger
            .resolve(dispute.id, DisputeStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_resolve_unblocks_release() {
        let fx = fixture().await;
        let dispute = fx.ledger.create(new_dispute(fx.transaction_id)).await.unwrap();

        let resolved = fx
            .ledger
            .resolve(dispute.id, DisputeStatus::Resolved)
            .await
            .unwrap();
        assert_eq!(resolved.status, DisputeStatus::Resolved);
        assert!(resolved.updated_at >= resolved.created_at);
        assert!(!fx.ledger.is_release_blocked(fx.transaction_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_still_blocks() {
        let fx = fixture().await;
        let dispute = fx.ledger.create(new_dispute(fx.transaction_id)).await.unwrap();
        fx.ledger
            .resolve(dispute.id, DisputeStatus::Rejected)
            .await
            .unwrap();
        assert!(fx.ledger.is_release_blocked(fx.transaction_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolution_records_broadcast_effect() {
        let fx = fixture().await;
        let dispute = fx.ledger.create(new_dispute(fx.transaction_id)).await.unwrap();
        fx.ledger
            .resolve(dispute.id, DisputeStatus::Resolved)
            .await
            .unwrap();

        let entries = crate::store::OutboxStore::entries_for_transaction(
            fx.store.as_ref(),
            fx.transaction_id,
        )
        .await
        .unwrap();
        assert!(entries.iter().any(|e| matches!(
            e.effect,
            SideEffect::DisputeResolvedEvent { dispute_id } if dispute_id == dispute.id
        )));
    }

    #[tokio::test]
    async fn test_no_dispute_means_unblocked() {
        let fx = fixture().await;
        assert!(!fx.ledger.is_release_blocked(fx.transaction_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let fx = fixture().await;
        let err = fx.ledger.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
