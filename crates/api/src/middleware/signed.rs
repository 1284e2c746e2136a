//! Signed JSON bodies from the messaging gateway.

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use orderalert_common::error::AppError;
use orderalert_engine::signature;

use crate::state::AppState;

/// Header carrying the base64 HMAC-SHA256 of the raw callback body.
pub const CALLBACK_SIGNATURE_HEADER: &str = "x-wa-signature";

/// A JSON body whose signature was checked against the callback secret
/// before it was parsed.
#[derive(Debug, Clone)]
pub struct SignedJson<T>(pub T);

impl<T> FromRequest<AppState> for SignedJson<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let provided = req
            .headers()
            .get(CALLBACK_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AppError::Authentication("Missing callback signature".to_string()))?;

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(format!("Unreadable callback body: {}", e)))?;

        if !signature::verify(state.config.wa_callback_secret.as_bytes(), &body, &provided) {
            tracing::warn!("Gateway callback signature mismatch");
            return Err(AppError::InvalidSignature(
                "Callback signature does not match body".to_string(),
            ));
        }

        let value = serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid callback body: {}", e)))?;
        Ok(SignedJson(value))
    }
}
