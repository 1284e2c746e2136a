//! Notification pipeline: webhook admission, event processing, rendering,
//! dispatch and delivery tracking.

pub mod admission;
pub mod dispatcher;
pub mod idempotency;
pub mod memory;
pub mod pg;
pub mod processor;
pub mod queues;
pub mod resend;
pub mod rules;
pub mod schedule;
pub mod signature;
pub mod status;
pub mod store;
pub mod template;
pub mod tracker;

use orderalert_common::error::AppError;
use orderalert_queue::{JobError, QueueError};

pub(crate) fn queue_error(err: QueueError) -> AppError {
    AppError::Queue(err.to_string())
}

/// Map a pipeline error onto the queue's retry verdict.
pub fn job_error(err: AppError) -> JobError {
    if err.is_retryable() {
        JobError::Retryable(err.to_string())
    } else {
        JobError::Permanent(err.to_string())
    }
}
