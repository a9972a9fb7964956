//! Webhook registration routes

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::handlers::{ApiResult, AppState};
use crate::webhook::{NewSubscription, Subscription};

/// `POST /webhooks`
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state.registry.register(input).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// `GET /webhooks`
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.registry.list().await?))
}
