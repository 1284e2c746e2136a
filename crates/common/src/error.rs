use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Missing credentials (e.g. no webhook signature header).
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Credentials present but wrong.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template render error: {0}")]
    TemplateRender(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a queue job failing with this error should be attempted again.
    ///
    /// Malformed input and misconfiguration never fix themselves, so those are
    /// terminal; infrastructure and provider failures are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::NotFound(_)
            | AppError::Provider(_)
            | AppError::Queue(_)
            | AppError::Internal(_) => true,
            AppError::Authentication(_)
            | AppError::InvalidSignature(_)
            | AppError::Validation(_)
            | AppError::TemplateNotFound(_)
            | AppError::TemplateRender(_)
            | AppError::Conflict(_)
            | AppError::Config(_) => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Redis(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Authentication(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::InvalidSignature(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::TemplateNotFound(_) | AppError::TemplateRender(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::Provider(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Queue(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
