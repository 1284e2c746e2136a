use thiserror::Error;

/// Failures of the queue storage itself.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

/// Verdict of a job handler that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Transient failure; the queue schedules another attempt if budget remains.
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help (bad input, misconfiguration); fail immediately.
    #[error("{0}")]
    Permanent(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable(_))
    }
}
