//! JWT authentication for operator routes.
//!
//! Provides JWT encoding/decoding plus an `Operator` Axum extractor
//! that validates the Authorization header on protected routes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use orderalert_common::error::AppError;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject, the operator's identifier
    pub sub: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated operator extracted from a JWT.
///
/// ```ignore
/// async fn handler(operator: Operator) -> impl IntoResponse {
///     tracing::info!(operator = %operator.subject, "...");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Operator {
    pub subject: String,
    pub claims: Claims,
}

/// Encode a JWT for an operator.
pub fn encode_jwt(subject: &str, secret: &str, expiry_hours: u64) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours as i64);

    let claims = Claims {
        sub: subject.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a JWT.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Authentication(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

/// Extracts and validates the JWT from the `Authorization: Bearer <token>` header.
impl FromRequestParts<AppState> for Operator {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let token = auth_header
                .as_deref()
                .and_then(|auth| auth.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    AppError::Authentication(
                        "Missing or invalid Authorization header. Use 'Bearer <JWT>'".to_string(),
                    )
                })?;

            let claims = decode_jwt(token, &secret)?;
            if claims.sub.trim().is_empty() {
                return Err(AppError::Authentication("Token has no subject".to_string()));
            }

            Ok(Operator {
                subject: claims.sub.clone(),
                claims,
            })
        }
    }
}
