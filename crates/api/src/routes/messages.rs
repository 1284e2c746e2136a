//! Operator message routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::Message;
use orderalert_engine::resend::ResendReceipt;

use crate::middleware::auth::Operator;
use crate::state::AppState;

const DEFAULT_FAILED_LIMIT: i64 = 50;
const MAX_FAILED_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages/failed", get(list_failed))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/resend", post(resend_message))
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    pub shop_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// GET /api/messages/failed: most recent failed messages first.
async fn list_failed(
    State(state): State<AppState>,
    _operator: Operator,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<Message>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_LIMIT)
        .clamp(1, MAX_FAILED_LIMIT);
    let messages = state.messages.list_failed(query.shop_id, limit).await?;
    Ok(Json(messages))
}

/// GET /api/messages/{id}
async fn get_message(
    State(state): State<AppState>,
    _operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>, AppError> {
    state
        .messages
        .find_message(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))
}

/// POST /api/messages/{id}/resend: 409 unless the message failed.
async fn resend_message(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ResendReceipt>), AppError> {
    let receipt = state.resend.resend(id).await?;
    tracing::info!(
        operator = %operator.subject,
        message_id = %id,
        job_id = %receipt.job_id,
        "Operator resend"
    );
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
