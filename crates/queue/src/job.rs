use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::SchedulingPolicy;

/// Lifecycle of a job inside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted with a delay (or backing off) and not yet visible.
    Delayed,
    /// Visible to workers.
    Waiting,
    /// Claimed by a worker.
    Active,
    Completed,
    /// Attempt budget spent or permanently rejected by the handler.
    Failed,
}

/// Stored form of a job, shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub payload: serde_json::Value,
    pub policy: SchedulingPolicy,
    pub state: JobState,
    /// Attempts that ran to a failure. The attempt in progress is not counted.
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: &str, payload: serde_json::Value, policy: SchedulingPolicy) -> Self {
        let state = if policy.delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        Self {
            id: id.to_string(),
            payload,
            policy,
            state,
            attempts_made: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            finished_at: None,
        }
    }

    /// 1-based number of the attempt a worker is running right now.
    pub fn current_attempt(&self) -> u32 {
        self.attempts_made + 1
    }
}

/// A claimed job with its payload decoded, as handed to a handler.
#[derive(Debug, Clone)]
pub struct Job<T> {
    pub id: String,
    pub payload: T,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl<T> Job<T> {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with this id already exists; nothing was submitted.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Another attempt is scheduled after `retry_in`.
    Retrying { attempts_made: u32, retry_in: Duration },
    /// Attempt budget spent; the job moved to the failed set.
    Exhausted { attempts_made: u32 },
    /// Handler reported a permanent failure; the job moved to the failed set.
    Rejected { attempts_made: u32 },
}

impl FailOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FailOutcome::Retrying { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub failed: usize,
}
