//! Transaction record types and input validation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, settlement not yet authorized
    Pending,
    /// Settled; `completed_at` is stamped
    Completed,
    /// Settlement failed
    Failed,
    /// Withdrawn before settlement
    Cancelled,
}

impl TransactionStatus {
    /// String form used on the wire and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of value transfer a transaction records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Direct payment
    Payment,
    /// Funds moved into escrow, held pending
    EscrowDeposit,
    /// Release of previously escrowed funds
    EscrowRelease,
    /// Reversal of an earlier transfer
    Refund,
}

impl TransactionKind {
    /// Whether completing this kind triggers the settlement side effects
    /// (invoice generation and the `payment.completed` event).
    pub fn settles(&self) -> bool {
        matches!(self, Self::Payment | Self::EscrowRelease)
    }

    /// String form used on the wire and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::EscrowDeposit => "escrow_deposit",
            Self::EscrowRelease => "escrow_release",
            Self::Refund => "refund",
        }
    }
}

/// A value-transfer record.
///
/// Invariants maintained by the ledger:
/// - `amount > 0`
/// - `external_reference` is globally unique
/// - `completed_at` is `Some` iff `status == Completed`
/// - `invoice_ref`, once set, never changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Ledger identity
    pub id: Uuid,
    /// Paying party (opaque user reference)
    pub from_party: String,
    /// Receiving party (opaque user reference)
    pub to_party: String,
    /// Project the transfer belongs to
    pub project: String,
    /// Positive transfer amount
    pub amount: Decimal,
    /// Currency code, e.g. "USD"
    pub currency: String,
    /// Unique external settlement reference (e.g. an on-chain hash)
    pub external_reference: String,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// Kind of transfer
    pub kind: TransactionKind,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Set exactly when the transaction reaches `Completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Billing artifact reference, set at most once after completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_ref: Option<String>,
}

/// Input for creating a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    /// Paying party
    pub from_party: String,
    /// Receiving party
    pub to_party: String,
    /// Project reference
    pub project: String,
    /// Transfer amount, must be positive
    pub amount: Decimal,
    /// Currency code
    pub currency: String,
    /// Unique external settlement reference
    pub external_reference: String,
    /// Kind of transfer
    pub kind: TransactionKind,
    /// Initial status; defaults to `Pending`
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

impl NewTransaction {
    /// Validate the input before any lookup or state mutation.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(Error::validation("amount must be positive"));
        }
        for (field, value) in [
            ("from_party", &self.from_party),
            ("to_party", &self.to_party),
            ("project", &self.project),
            ("currency", &self.currency),
            ("external_reference", &self.external_reference),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("{field} cannot be empty")));
            }
        }
        Ok(())
    }

    /// Materialize a transaction record with a fresh id.
    pub fn into_transaction(self, now: DateTime<Utc>) -> Transaction {
        let status = self.status.unwrap_or(TransactionStatus::Pending);
        let completed_at = (status == TransactionStatus::Completed).then_some(now);
        Transaction {
            id: Uuid::new_v4(),
            from_party: self.from_party,
            to_party: self.to_party,
            project: self.project,
            amount: self.amount,
            currency: self.currency,
            external_reference: self.external_reference,
            status,
            kind: self.kind,
            created_at: now,
            completed_at,
            invoice_ref: None,
        }
    }
}

/// Partial update for a transaction. Only fields present are applied.
///
/// Status overwrites are unrestricted; the ledger keeps `completed_at`
/// consistent with the resulting status in both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionPatch {
    /// New paying party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_party: Option<String>,
    /// New receiving party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_party: Option<String>,
    /// New project reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// New amount, must be positive when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// New currency code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// New status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    /// New kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransactionKind>,
}

impl TransactionPatch {
    /// Validate the patch before applying it.
    pub fn validate(&self) -> Result<()> {
        if let Some(amount) = self.amount {
            if amount <= Decimal::ZERO {
                return Err(Error::validation("amount must be positive"));
            }
        }
        if let Some(currency) = &self.currency {
            if currency.trim().is_empty() {
                return Err(Error::validation("currency cannot be empty"));
            }
        }
        Ok(())
    }

    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self.from_party.is_none()
            && self.to_party.is_none()
            && self.project.is_none()
            && self.amount.is_none()
            && self.currency.is_none()
            && self.status.is_none()
            && self.kind.is_none()
    }

    /// Apply the present fields onto `tx`. Does not touch `completed_at`;
    /// the ledger owns that invariant.
    pub fn apply(&self, tx: &mut Transaction) {
        if let Some(v) = &self.from_party {
            tx.from_party = v.clone();
        }
        if let Some(v) = &self.to_party {
            tx.to_party = v.clone();
        }
        if let Some(v) = &self.project {
            tx.project = v.clone();
        }
        if let Some(v) = self.amount {
            tx.amount = v;
        }
        if let Some(v) = &self.currency {
            tx.currency = v.clone();
        }
        if let Some(v) = self.status {
            tx.status = v;
        }
        if let Some(v) = self.kind {
            tx.kind = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn sample_new() -> NewTransaction {
        NewTransaction {
            from_party: "u-buyer".to_string(),
            to_party: "u-seller".to_string(),
            project: "p-site".to_string(),
            amount: Decimal::from_f64(100.0).unwrap(),
            currency: "USD".to_string(),
            external_reference: "0xabc".to_string(),
            kind: TransactionKind::EscrowDeposit,
            status: None,
        }
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        let mut input = sample_new();
        input.amount = Decimal::ZERO;
        assert!(matches!(input.validate(), Err(Error::Validation(_))));

        input.amount = Decimal::from_f64(-5.0).unwrap();
        assert!(matches!(input.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut input = sample_new();
        input.external_reference = "  ".to_string();
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("external_reference"));
    }

    #[test]
    fn test_into_transaction_defaults_to_pending() {
        let tx = sample_new().into_transaction(Utc::now());
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.completed_at.is_none());
        assert!(tx.invoice_ref.is_none());
    }

    #[test]
    fn test_into_transaction_completed_stamps_timestamp() {
        let mut input = sample_new();
        input.status = Some(TransactionStatus::Completed);
        let tx = input.into_transaction(Utc::now());
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.completed_at.is_some());
    }

    #[test]
    fn test_kind_settlement_rules() {
        assert!(TransactionKind::Payment.settles());
        assert!(TransactionKind::EscrowRelease.settles());
        assert!(!TransactionKind::EscrowDeposit.settles());
        assert!(!TransactionKind::Refund.settles());
    }

    #[test]
    fn test_patch_apply_only_present_fields() {
        let mut tx = sample_new().into_transaction(Utc::now());
        let patch = TransactionPatch {
            currency: Some("EUR".to_string()),
            ..Default::default()
        };
        patch.apply(&mut tx);
        assert_eq!(tx.currency, "EUR");
        assert_eq!(tx.from_party, "u-buyer");
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let kind: TransactionKind = serde_json::from_str("\"escrow_release\"").unwrap();
        assert_eq!(kind, TransactionKind::EscrowRelease);
    }
}
