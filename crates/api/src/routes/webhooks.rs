//! Storefront webhook endpoints.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes the
//! store sent, so nothing may parse or re-serialize it before verification.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use orderalert_common::error::AppError;
use orderalert_common::types::Topic;
use orderalert_engine::admission::{AdmissionOutcome, WebhookRequest};

use crate::state::AppState;

pub const TOPIC_HEADER: &str = "x-shopify-topic";
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";
pub const WEBHOOK_ID_HEADER: &str = "x-shopify-webhook-id";
pub const SIGNATURE_HEADER: &str = "x-shopify-hmac-sha256";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/{resource}/{action}", post(receive_webhook))
}

/// POST /webhooks/{resource}/{action}: admit one webhook delivery.
///
/// 202 when the event was queued, 200 for a redelivery of a known webhook.
async fn receive_webhook(
    State(state): State<AppState>,
    Path((resource, action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let route_topic: Topic = format!("{}/{}", resource, action)
        .parse()
        .map_err(|_| AppError::NotFound(format!("No webhook endpoint for {}/{}", resource, action)))?;

    let request = WebhookRequest {
        topic: header(&headers, TOPIC_HEADER),
        shop_domain: header(&headers, SHOP_DOMAIN_HEADER),
        webhook_id: header(&headers, WEBHOOK_ID_HEADER),
        signature: header(&headers, SIGNATURE_HEADER),
        body: &body,
    };

    match state.admission.admit(Some(route_topic), request).await? {
        AdmissionOutcome::Accepted { .. } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "message": "Accepted" })),
        )),
        AdmissionOutcome::Duplicate { .. } => Ok((
            StatusCode::OK,
            Json(json!({ "message": "OK (duplicate)" })),
        )),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
