//! HTTP surface
//!
//! A thin axum layer over the core services. Handlers validate nothing
//! beyond deserialization; every rule lives in the services so other
//! transports (jobs, CLIs) get identical behavior.
//!
//! Error mapping: `NotFound` -> 404, `Conflict` -> 409, `Validation` -> 422,
//! everything else -> 500. Gate and idempotency outcomes of `release-funds`
//! are 200s with a descriptive body, not errors.

pub mod disputes;
pub mod status;
pub mod transactions;
pub mod webhooks;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::dispute::DisputeLedger;
use crate::error::Error;
use crate::ledger::TransactionLedger;
use crate::webhook::SubscriptionRegistry;

pub use status::ServiceStats;

/// Shared application state for the HTTP surface.
pub struct AppState {
    /// Transaction lifecycle service
    pub ledger: Arc<TransactionLedger>,
    /// Dispute lifecycle service
    pub disputes: Arc<DisputeLedger>,
    /// Webhook subscription registry
    pub registry: Arc<SubscriptionRegistry>,
    /// Observability counters
    pub stats: Arc<ServiceStats>,
    /// Startup instant for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Assemble the state from the wired services.
    pub fn new(
        ledger: Arc<TransactionLedger>,
        disputes: Arc<DisputeLedger>,
        registry: Arc<SubscriptionRegistry>,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self {
            ledger,
            disputes,
            registry,
            stats,
            started_at: Instant::now(),
        }
    }
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::health_handler))
        .route("/status", get(status::status_handler))
        .route(
            "/transactions",
            post(transactions::create).get(transactions::list),
        )
        .route(
            "/transactions/:id",
            get(transactions::get_by_id)
                .patch(transactions::patch)
                .delete(transactions::delete),
        )
        .route("/transactions/:id/release", post(transactions::release))
        .route("/disputes", post(disputes::create).get(disputes::list))
        .route(
            "/disputes/:id",
            get(disputes::get_by_id)
                .patch(disputes::resolve)
                .delete(disputes::delete),
        )
        .route("/webhooks", post(webhooks::register).get(webhooks::list))
        .layer(crate::cors::cors_layer())
        .with_state(state)
}

/// JSON error body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Wrapper turning [`Error`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Configuration(_)
            | Error::Storage(_)
            | Error::Render(_)
            | Error::Blob(_)
            | Error::Delivery(_)
            | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Handler result alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: Error) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(Error::not_found("transaction", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::conflict("duplicate")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::validation("bad amount")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(Error::Storage("lost".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
