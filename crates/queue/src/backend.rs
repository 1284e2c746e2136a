use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueueError;
use crate::job::{EnqueueOutcome, FailOutcome, JobRecord, QueueCounts};
use crate::policy::SchedulingPolicy;

/// Storage seam of a named queue.
///
/// Payloads are opaque JSON here; [`Queue`] adds the typed view.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a job. An id the queue already holds, in any state, is a no-op.
    async fn enqueue(
        &self,
        id: &str,
        payload: serde_json::Value,
        policy: SchedulingPolicy,
    ) -> Result<EnqueueOutcome, QueueError>;

    /// Take the oldest job whose ready time has passed, marking it active.
    async fn claim(&self) -> Result<Option<JobRecord>, QueueError>;

    async fn complete(&self, id: &str) -> Result<(), QueueError>;

    /// Record a failed attempt. Retryable failures with budget left are
    /// rescheduled with the job's backoff; everything else goes to the failed set.
    async fn fail(&self, id: &str, error: &str, retryable: bool)
    -> Result<FailOutcome, QueueError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Time until the next scheduled job becomes ready, if any job is scheduled.
    async fn next_ready_in(&self) -> Result<Option<Duration>, QueueError>;

    /// Count an attempt against jobs whose worker vanished mid-attempt, then
    /// reschedule them or move them to the failed set like [`JobQueue::fail`].
    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        Ok(0)
    }

    /// Most recently failed jobs first.
    async fn failed_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Park an idle worker until work may be available, at most `max_wait`.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}

/// Typed producer handle over a [`JobQueue`].
pub struct Queue<T> {
    backend: Arc<dyn JobQueue>,
    default_policy: SchedulingPolicy,
    _payload: PhantomData<fn(T)>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            default_policy: self.default_policy,
            _payload: PhantomData,
        }
    }
}

impl<T: Serialize> Queue<T> {
    pub fn new(backend: Arc<dyn JobQueue>, default_policy: SchedulingPolicy) -> Self {
        Self {
            backend,
            default_policy,
            _payload: PhantomData,
        }
    }

    /// Submit with the queue's default policy.
    pub async fn submit(&self, id: &str, payload: &T) -> Result<EnqueueOutcome, QueueError> {
        self.submit_with(id, payload, self.default_policy).await
    }

    /// Submit with the default policy, held back for `delay`.
    pub async fn submit_delayed(
        &self,
        id: &str,
        payload: &T,
        delay: Duration,
    ) -> Result<EnqueueOutcome, QueueError> {
        self.submit_with(id, payload, self.default_policy.with_delay(delay))
            .await
    }

    pub async fn submit_with(
        &self,
        id: &str,
        payload: &T,
        policy: SchedulingPolicy,
    ) -> Result<EnqueueOutcome, QueueError> {
        let value = serde_json::to_value(payload)?;
        let outcome = self.backend.enqueue(id, value, policy).await?;

        match outcome {
            EnqueueOutcome::Enqueued => tracing::debug!(
                queue = self.backend.name(),
                job_id = id,
                delay_ms = policy.delay_ms,
                "Job enqueued"
            ),
            EnqueueOutcome::Duplicate => tracing::debug!(
                queue = self.backend.name(),
                job_id = id,
                "Job id already known, submission dropped"
            ),
        }

        Ok(outcome)
    }

    pub fn backend(&self) -> &Arc<dyn JobQueue> {
        &self.backend
    }

    pub fn default_policy(&self) -> SchedulingPolicy {
        self.default_policy
    }
}
