use orderalert_common::error::AppError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Session exists but is pairing or disconnected.
    #[error("Messaging session '{0}' is not ready")]
    NotReady(String),

    #[error("Provider call timed out after {0}s")]
    Timeout(u64),

    #[error("Provider transport error: {0}")]
    Transport(String),

    /// Provider answered and refused the message.
    #[error("Provider rejected message: {0}")]
    Rejected(String),

    #[error("No messaging session for shop {0}")]
    UnknownSession(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnknownSession(_) => AppError::Config(err.to_string()),
            other => AppError::Provider(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}
