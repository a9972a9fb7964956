//! Error types for Payflow
//!
//! This module provides the crate-wide error taxonomy using `thiserror`.
//! Gate and idempotency outcomes (`BlockedByDispute`, `AlreadyReleased`,
//! see [`crate::ledger::ReleaseOutcome`]) are deliberately *not* errors:
//! callers treat them as status information, so they live on the success
//! path of the ledger API.

use thiserror::Error;

/// The main error type for Payflow operations
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced entity does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up (e.g. "transaction", "user")
        resource: &'static str,
        /// The identifier that failed to resolve
        id: String,
    },

    /// A uniqueness or redundant-write violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed or out-of-range input, rejected before any state mutation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or unusable configuration; fatal at startup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage-layer failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Invoice document rendering failed
    #[error("document rendering failed: {0}")]
    Render(String),

    /// Blob store failure while persisting or signing an artifact
    #[error("blob store error: {0}")]
    Blob(String),

    /// Webhook delivery infrastructure failure (not a per-target miss)
    #[error("webhook delivery failed: {0}")]
    Delivery(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Payflow operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a `NotFound` error for a resource kind and id
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Create a `Conflict` error from a message
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a `Validation` error from a message
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a `Configuration` error from a message
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }
}
