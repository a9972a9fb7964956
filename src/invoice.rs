//! Invoice trigger
//!
//! Turns a completed transaction into an idempotent billing artifact
//! reference. Document layout and blob storage are external collaborators
//! behind the [`DocumentRenderer`] and [`BlobStore`] traits; this module
//! owns the invoice model, the render/store orchestration and the set-once
//! claim of `invoice_ref`.
//!
//! Idempotence under concurrency: two callers may both render a document,
//! but [`crate::store::TransactionStore::claim_invoice_ref`] admits exactly
//! one artifact. The losing artifact is discarded and the loser returns the
//! winner's reference.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::{Transaction, TransactionStatus};
use crate::lookup::{ProjectCatalog, UserDirectory};
use crate::store::{ClaimOutcome, TransactionStore};

/// A party line on an invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyLine {
    /// Opaque user id
    pub id: String,
    /// Name shown on the document
    pub display_name: String,
}

/// The structured model handed to the document renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceModel {
    /// Human-readable invoice number
    pub invoice_number: String,
    /// The settled transaction
    pub transaction_id: Uuid,
    /// External settlement reference
    pub external_reference: String,
    /// Issue timestamp
    pub issued_at: DateTime<Utc>,
    /// Paying party
    pub from: PartyLine,
    /// Receiving party
    pub to: PartyLine,
    /// Project id
    pub project_id: String,
    /// Project title
    pub project_title: String,
    /// Settled amount
    pub amount: rust_decimal::Decimal,
    /// Currency code
    pub currency: String,
}

/// External document layout collaborator
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render the invoice model into document bytes.
    async fn render(&self, model: &InvoiceModel) -> Result<Vec<u8>>;

    /// MIME type of the rendered document
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }

    /// File extension for stored artifacts
    fn file_extension(&self) -> &'static str {
        "pdf"
    }
}

/// External blob storage collaborator
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes at `path`, returning the artifact's stable URL.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// A time-limited download URL for `path`.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String>;
}

/// Plain-text renderer used by the binary and in tests.
///
/// Real deployments plug a PDF layout service in behind
/// [`DocumentRenderer`]; the artifact contract is identical.
#[derive(Debug, Default)]
pub struct TextInvoiceRenderer;

#[async_trait]
impl DocumentRenderer for TextInvoiceRenderer {
    async fn render(&self, model: &InvoiceModel) -> Result<Vec<u8>> {
        let document = format!(
            "INVOICE {number}\n\
             issued: {issued}\n\
             transaction: {tx}\n\
             reference: {reference}\n\
             from: {from} ({from_id})\n\
             to: {to} ({to_id})\n\
             project: {project} ({project_id})\n\
             amount: {amount} {currency}\n",
            number = model.invoice_number,
            issued = model.issued_at.to_rfc3339(),
            tx = model.transaction_id,
            reference = model.external_reference,
            from = model.from.display_name,
            from_id = model.from.id,
            to = model.to.display_name,
            to_id = model.to.id,
            project = model.project_title,
            project_id = model.project_id,
            amount = model.amount,
            currency = model.currency,
        );
        Ok(document.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }
}

/// In-memory blob store used by the binary and in tests.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<std::collections::HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch stored bytes, for assertions in tests
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().get(path).map(|(bytes, _)| bytes.clone())
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.objects
            .write()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{path}"))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(path))
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        if !self.objects.read().contains_key(path) {
            return Err(Error::Blob(format!("no such object: {path}")));
        }
        let expires = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        Ok(format!("memory://{path}?expires={}", expires.timestamp()))
    }
}

/// Builds invoice artifacts for completed transactions, exactly once each.
pub struct InvoiceGenerator {
    transactions: Arc<dyn TransactionStore>,
    users: Arc<dyn UserDirectory>,
    projects: Arc<dyn ProjectCatalog>,
    renderer: Arc<dyn DocumentRenderer>,
    blobs: Arc<dyn BlobStore>,
    render_timeout: Duration,
}

impl InvoiceGenerator {
    /// Assemble the generator from its collaborators
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        users: Arc<dyn UserDirectory>,
        projects: Arc<dyn ProjectCatalog>,
        renderer: Arc<dyn DocumentRenderer>,
        blobs: Arc<dyn BlobStore>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            transactions,
            users,
            projects,
            renderer,
            blobs,
            render_timeout,
        }
    }

    /// Ensure the transaction has a billing artifact and return its
    /// reference.
    ///
    /// Idempotent by inspection: an already-set `invoice_ref` is returned
    /// unchanged without touching the renderer.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when the transaction is absent
    /// - [`Error::Validation`] when it is not completed
    /// - [`Error::Render`] / [`Error::Blob`] on collaborator failure
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn ensure_invoice(&self, transaction_id: Uuid) -> Result<String> {
        let tx = self
            .transactions
            .get(transaction_id)
            .await?
            .ok_or_else(|| Error::not_found("transaction", transaction_id.to_string()))?;

        if tx.status != TransactionStatus::Completed {
            return Err(Error::validation(format!(
                "cannot invoice a {} transaction",
                tx.status
            )));
        }
        if let Some(existing) = &tx.invoice_ref {
            debug!("Invoice already exists");
            return Ok(existing.clone());
        }

        let model = self.build_model(&tx).await?;
        let bytes = tokio::time::timeout(self.render_timeout, self.renderer.render(&model))
            .await
            .map_err(|_| {
                Error::Render(format!(
                    "renderer timed out after {:?}",
                    self.render_timeout
                ))
            })??;

        let path = format!(
            "invoices/{}.{}",
            tx.id,
            self.renderer.file_extension()
        );
        let artifact = self
            .blobs
            .put(&path, bytes, self.renderer.content_type())
            .await?;

        match self.transactions.claim_invoice_ref(tx.id, &artifact).await? {
            ClaimOutcome::Claimed(artifact) => {
                info!(artifact = %artifact, "Invoice generated");
                Ok(artifact)
            }
            ClaimOutcome::AlreadySet(winner) => {
                // A concurrent completion won the claim; our artifact is
                // orphaned and the winner's reference is authoritative.
                debug!(winner = %winner, "Lost invoice claim race");
                Ok(winner)
            }
            ClaimOutcome::Missing => {
                Err(Error::not_found("transaction", tx.id.to_string()))
            }
        }
    }

    /// Resolve display data for the invoice. Parties validated at creation
    /// time may have left the directory since; the document falls back to
    /// the raw id rather than failing the artifact.
    async fn build_model(&self, tx: &Transaction) -> Result<InvoiceModel> {
        let from = self.party_line(&tx.from_party).await?;
        let to = self.party_line(&tx.to_party).await?;
        let (project_id, project_title) = match self.projects.find_by_id(&tx.project).await? {
            Some(project) => (project.id, project.title),
            None => (tx.project.clone(), tx.project.clone()),
        };

        let short_id = tx.id.simple().to_string();
        Ok(InvoiceModel {
            invoice_number: format!("INV-{}", &short_id[..8].to_uppercase()),
            transaction_id: tx.id,
            external_reference: tx.external_reference.clone(),
            issued_at: Utc::now(),
            from,
            to,
            project_id,
            project_title,
            amount: tx.amount,
            currency: tx.currency.clone(),
        })
    }

    async fn party_line(&self, user_id: &str) -> Result<PartyLine> {
        Ok(match self.users.find_by_id(user_id).await? {
            Some(user) => PartyLine {
                id: user.id,
                display_name: user.display_name,
            },
            None => PartyLine {
                id: user_id.to_string(),
                display_name: user_id.to_string(),
            },
        })
    }
}
