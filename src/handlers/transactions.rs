//! Transaction routes

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::handlers::{ApiResult, AppState};
use crate::ledger::{
    NewTransaction, ReleaseOutcome, Transaction, TransactionPatch, TransactionStatus,
};

/// `POST /transactions`
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewTransaction>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let tx = state.ledger.create(input).await?;
    state.stats.record_transaction_created();
    if tx.status == TransactionStatus::Completed {
        state.stats.record_transaction_completed();
    }
    Ok((StatusCode::CREATED, Json(tx)))
}

/// `GET /transactions`
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Transaction>>> {
    Ok(Json(state.ledger.list().await?))
}

/// `GET /transactions/:id`
pub async fn get_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Transaction>> {
    Ok(Json(state.ledger.get(id).await?))
}

/// `PATCH /transactions/:id`
pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TransactionPatch>,
) -> ApiResult<Json<Transaction>> {
    let before = state.ledger.get(id).await?;
    let tx = state.ledger.update(id, patch).await?;
    if tx.status == TransactionStatus::Completed && before.status != TransactionStatus::Completed {
        state.stats.record_transaction_completed();
    }
    Ok(Json(tx))
}

/// `DELETE /transactions/:id`
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.ledger.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /transactions/:id/release`
///
/// Always 200 for a known transaction: `already_released` and
/// `blocked_by_dispute` are idempotent status information, not failures.
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReleaseOutcome>> {
    let outcome = state.ledger.release_funds(id).await?;
    if outcome.is_released() {
        state.stats.record_transaction_completed();
    }
    Ok(Json(outcome))
}
