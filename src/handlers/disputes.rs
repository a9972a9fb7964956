//! Dispute routes

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::dispute::{Dispute, DisputeStatus, NewDispute};
use crate::handlers::{ApiResult, AppState};

/// Body for `PATCH /disputes/:id`
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// The status to move the dispute to
    pub status: DisputeStatus,
}

/// `POST /disputes`
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewDispute>,
) -> ApiResult<(StatusCode, Json<Dispute>)> {
    let dispute = state.disputes.create(input).await?;
    state.stats.record_dispute_opened();
    Ok((StatusCode::CREATED, Json(dispute)))
}

/// `GET /disputes`
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Dispute>>> {
    Ok(Json(state.disputes.list().await?))
}

/// `GET /disputes/:id`
pub async fn get_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Dispute>> {
    Ok(Json(state.disputes.get(id).await?))
}

/// `PATCH /disputes/:id`
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult<Json<Dispute>> {
    let dispute = state.disputes.resolve(id, body.status).await?;
    state.stats.record_dispute_decided();
    Ok(Json(dispute))
}

/// `DELETE /disputes/:id`
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.disputes.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
