//! Messaging session status for operators.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::ConnectionState;
use orderalert_notifier::MessagingProvider;

use crate::middleware::auth::Operator;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/wa/status", get(status))
        .route("/api/wa/pairing-code", get(pairing_code))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    /// Shop whose session to report; the shared session when absent.
    pub shop_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub status: ConnectionState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCode {
    pub session_id: String,
    pub pairing_code: String,
}

/// GET /api/wa/status
async fn status(
    State(state): State<AppState>,
    _operator: Operator,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionStatus>, AppError> {
    let provider = session(&state, query.shop_id)?;

    let status = match provider.refresh_connection().await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(
                session_id = provider.session_id(),
                error = %e,
                "Could not refresh session state, reporting last known"
            );
            provider.connection_state()
        }
    };

    Ok(Json(SessionStatus {
        session_id: provider.session_id().to_string(),
        status,
    }))
}

/// GET /api/wa/pairing-code: 404 unless the session is pairing.
async fn pairing_code(
    State(state): State<AppState>,
    _operator: Operator,
    Query(query): Query<SessionQuery>,
) -> Result<Json<PairingCode>, AppError> {
    let provider = session(&state, query.shop_id)?;

    match (provider.connection_state(), provider.pairing_code()) {
        (ConnectionState::Pairing, Some(code)) => Ok(Json(PairingCode {
            session_id: provider.session_id().to_string(),
            pairing_code: code,
        })),
        _ => Err(AppError::NotFound(
            "Pairing code not available or session not in pairing state".to_string(),
        )),
    }
}

fn session(state: &AppState, shop_id: Option<Uuid>) -> Result<Arc<dyn MessagingProvider>, AppError> {
    match shop_id {
        Some(shop_id) => Ok(state.sessions.provider_for_shop(shop_id)?),
        None => state
            .sessions
            .providers()
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("No messaging session configured".to_string())),
    }
}
