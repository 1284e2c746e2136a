//! Messaging gateway callbacks: delivery receipts, inbound replies and
//! connection changes. Each body is signed with the callback secret.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use orderalert_common::error::AppError;
use orderalert_common::types::{ConnectionState, DeliveryReceipt, InboundMessage};
use orderalert_engine::tracker::{InboundOutcome, ReceiptOutcome};

use crate::middleware::signed::SignedJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/wa/callbacks/receipt", post(receipt))
        .route("/api/wa/callbacks/inbound", post(inbound))
        .route("/api/wa/callbacks/connection", post(connection))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCallback {
    /// Session that changed; every session when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub state: ConnectionState,
    #[serde(default)]
    pub pairing_code: Option<String>,
}

/// POST /api/wa/callbacks/receipt
async fn receipt(
    State(state): State<AppState>,
    SignedJson(receipt): SignedJson<DeliveryReceipt>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = match state.tracker.apply_receipt(&receipt).await? {
        ReceiptOutcome::Advanced { to, .. } => json!({ "outcome": "advanced", "status": to }),
        ReceiptOutcome::Ignored { status, .. } => json!({ "outcome": "ignored", "status": status }),
        ReceiptOutcome::Parked => json!({ "outcome": "parked" }),
    };
    Ok(Json(outcome))
}

/// POST /api/wa/callbacks/inbound
async fn inbound(
    State(state): State<AppState>,
    SignedJson(message): SignedJson<InboundMessage>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = match state.tracker.handle_inbound(&message).await? {
        InboundOutcome::OptedOut { .. } => "opted_out",
        InboundOutcome::AlreadyOptedOut { .. } => "already_opted_out",
        InboundOutcome::NotAKeyword => "ignored",
        InboundOutcome::UnknownSender => "unknown_sender",
    };
    Ok(Json(json!({ "outcome": outcome })))
}

/// POST /api/wa/callbacks/connection
async fn connection(
    State(state): State<AppState>,
    SignedJson(change): SignedJson<ConnectionCallback>,
) -> Result<Json<serde_json::Value>, AppError> {
    let providers: Vec<_> = state
        .sessions
        .providers()
        .into_iter()
        .filter(|p| {
            change
                .session_id
                .as_deref()
                .is_none_or(|id| p.session_id() == id)
        })
        .collect();

    if providers.is_empty() {
        return Err(AppError::NotFound(format!(
            "Unknown messaging session '{}'",
            change.session_id.as_deref().unwrap_or("-")
        )));
    }

    for provider in &providers {
        provider.update_connection(change.state, change.pairing_code.clone());
    }
    Ok(Json(json!({ "updated": providers.len() })))
}
