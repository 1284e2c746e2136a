use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::backend::JobQueue;
use crate::error::QueueError;
use crate::job::{EnqueueOutcome, FailOutcome, JobRecord, JobState, QueueCounts};
use crate::policy::SchedulingPolicy;

/// In-process queue backed by tokio time.
///
/// Used by tests and single-process deployments. Nothing survives a restart.
pub struct MemoryJobQueue {
    name: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobRecord>,
    /// (ready_at, submission sequence, id): FIFO among jobs ready at the same instant.
    schedule: BTreeSet<(Instant, u64, String)>,
    failed: Vec<String>,
    seq: u64,
}

impl Inner {
    fn schedule(&mut self, id: &str, ready_at: Instant) {
        self.seq += 1;
        self.schedule.insert((ready_at, self.seq, id.to_string()));
    }
}

impl MemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        id: &str,
        payload: serde_json::Value,
        policy: SchedulingPolicy,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(id) {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let record = JobRecord::new(id, payload, policy);
        inner.jobs.insert(id.to_string(), record);
        inner.schedule(id, Instant::now() + policy.delay());
        drop(inner);

        self.notify.notify_waiters();
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let ready = matches!(inner.schedule.first(), Some((at, _, _)) if *at <= now);
        if !ready {
            return Ok(None);
        }
        let Some((_, _, id)) = inner.schedule.pop_first() else {
            return Ok(None);
        };

        let record = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::UnknownJob(id.clone()))?;
        record.state = JobState::Active;
        Ok(Some(record.clone()))
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::UnknownJob(id.to_string()))?;
        record.state = JobState::Completed;
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::UnknownJob(id.to_string()))?;

        record.attempts_made += 1;
        record.last_error = Some(error.to_string());
        let attempts_made = record.attempts_made;

        let retry_in = if retryable {
            record.policy.retry_delay(attempts_made)
        } else {
            None
        };

        match retry_in {
            Some(delay) => {
                record.state = JobState::Delayed;
                inner.schedule(id, Instant::now() + delay);
                drop(inner);
                self.notify.notify_waiters();
                Ok(FailOutcome::Retrying {
                    attempts_made,
                    retry_in: delay,
                })
            }
            None => {
                record.state = JobState::Failed;
                record.finished_at = Some(Utc::now());
                inner.failed.push(id.to_string());
                if retryable {
                    Ok(FailOutcome::Exhausted { attempts_made })
                } else {
                    Ok(FailOutcome::Rejected { attempts_made })
                }
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        let mut record = inner.jobs.get(id).cloned();
        if let Some(r) = record.as_mut() {
            if r.state == JobState::Delayed && is_ready(&inner, id) {
                r.state = JobState::Waiting;
            }
        }
        Ok(record)
    }

    async fn next_ready_in(&self) -> Result<Option<Duration>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .schedule
            .first()
            .map(|(at, _, _)| at.saturating_duration_since(Instant::now())))
    }

    async fn failed_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .failed
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let inner = self.inner.lock().await;
        let active = inner
            .jobs
            .values()
            .filter(|r| r.state == JobState::Active)
            .count();
        Ok(QueueCounts {
            waiting: inner.schedule.len(),
            active,
            failed: inner.failed.len(),
        })
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(max_wait) => {}
        }
    }
}

fn is_ready(inner: &Inner, id: &str) -> bool {
    let now = Instant::now();
    inner
        .schedule
        .iter()
        .any(|(at, _, scheduled)| scheduled == id && *at <= now)
}
