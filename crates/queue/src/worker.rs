use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::JobQueue;
use crate::error::{JobError, QueueError};
use crate::job::{FailOutcome, Job};
use crate::rate_limit::RateLimiter;

/// Processes jobs of one queue.
///
/// Returning [`JobError::Retryable`] schedules another attempt while budget
/// remains; [`JobError::Permanent`] fails the job immediately.
#[async_trait]
pub trait JobHandler<T>: Send + Sync {
    async fn handle(&self, job: &Job<T>) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of jobs processed in parallel.
    pub concurrency: usize,
    /// Longest an idle worker sleeps before polling again.
    pub poll_interval: Duration,
    /// How often stalled jobs are swept back into the waiting set.
    pub stalled_check_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            stalled_check_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Self::default()
        }
    }
}

/// Result of processing one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Completed { job_id: String, attempt: u32 },
    Failed { job_id: String, outcome: FailOutcome },
}

/// A fixed set of workers draining one queue.
pub struct WorkerPool<T> {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler<T>>,
    limiter: Option<Arc<RateLimiter>>,
    config: WorkerPoolConfig,
}

impl<T> WorkerPool<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler<T>>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            limiter: None,
            config,
        }
    }

    /// Throttle handler starts across every worker of this pool.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Start the workers. They stop taking new jobs once `cancel` fires and
    /// finish the job they hold first.
    pub fn spawn(self, cancel: CancellationToken) -> WorkerPoolHandle {
        let queue_name = self.queue.name().to_string();
        let concurrency = self.config.concurrency.max(1);
        let pool = Arc::new(self);

        tracing::info!(queue = %queue_name, concurrency, "Starting worker pool");

        let mut tasks = Vec::with_capacity(concurrency + 1);
        for worker_id in 0..concurrency {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                pool.run_worker(worker_id, cancel).await;
            }));
        }

        let sweeper = pool.clone();
        tasks.push(tokio::spawn(async move {
            sweeper.run_stalled_sweeper(cancel).await;
        }));

        WorkerPoolHandle { queue_name, tasks }
    }

    /// Claim and process at most one ready job.
    pub async fn process_next(&self) -> Result<Option<JobReport>, QueueError> {
        let Some(record) = self.queue.claim().await? else {
            return Ok(None);
        };

        let queue = self.queue.name();
        let attempt = record.current_attempt();

        let payload: T = match serde_json::from_value(record.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                let reason = format!("Malformed job payload: {}", e);
                let outcome = self.queue.fail(&record.id, &reason, false).await?;
                tracing::error!(queue, job_id = %record.id, error = %reason, "Job rejected");
                return Ok(Some(JobReport::Failed {
                    job_id: record.id,
                    outcome,
                }));
            }
        };

        let job = Job {
            id: record.id,
            payload,
            attempt,
            max_attempts: record.policy.max_attempts,
            enqueued_at: record.enqueued_at,
        };

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let started = Instant::now();
        let result = self.handler.handle(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.queue.complete(&job.id).await?;
                tracing::info!(queue, job_id = %job.id, attempt, duration_ms, "Job completed");
                Ok(Some(JobReport::Completed {
                    job_id: job.id,
                    attempt,
                }))
            }
            Err(err) => {
                let outcome = self
                    .queue
                    .fail(&job.id, &err.to_string(), err.is_retryable())
                    .await?;
                log_failure(queue, &job.id, attempt, &err, outcome);
                Ok(Some(JobReport::Failed {
                    job_id: job.id,
                    outcome,
                }))
            }
        }
    }

    async fn run_worker(&self, worker_id: usize, cancel: CancellationToken) {
        let queue = self.queue.name();
        tracing::debug!(queue, worker_id, "Worker started");

        while !cancel.is_cancelled() {
            let wait = match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.idle_wait().await,
                Err(e) => {
                    tracing::error!(queue, worker_id, error = %e, "Queue error, backing off");
                    self.config.poll_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.wait_for_work(wait) => {}
            }
        }

        tracing::debug!(queue, worker_id, "Worker stopped");
    }

    async fn idle_wait(&self) -> Duration {
        match self.queue.next_ready_in().await {
            Ok(Some(next)) => next.min(self.config.poll_interval),
            _ => self.config.poll_interval,
        }
    }

    async fn run_stalled_sweeper(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.stalled_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.queue.recover_stalled().await {
                        tracing::warn!(queue = self.queue.name(), error = %e, "Stalled job sweep failed");
                    }
                }
            }
        }
    }
}

fn log_failure(queue: &str, job_id: &str, attempt: u32, err: &JobError, outcome: FailOutcome) {
    match outcome {
        FailOutcome::Retrying { retry_in, .. } => tracing::warn!(
            queue,
            job_id,
            attempt,
            retry_in_ms = retry_in.as_millis() as u64,
            error = %err,
            "Job failed, retry scheduled"
        ),
        FailOutcome::Exhausted { attempts_made } => tracing::error!(
            queue,
            job_id,
            attempts_made,
            error = %err,
            "Job failed permanently after exhausting retries"
        ),
        FailOutcome::Rejected { .. } => tracing::error!(
            queue,
            job_id,
            attempt,
            error = %err,
            "Job failed permanently"
        ),
    }
}

/// Join handle over a running pool.
pub struct WorkerPoolHandle {
    queue_name: String,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Wait for every worker to stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(queue = %self.queue_name, error = %e, "Worker task panicked");
            }
        }
        tracing::info!(queue = %self.queue_name, "Worker pool stopped");
    }
}
