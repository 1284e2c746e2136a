//! Redis-backed queue.
//!
//! Layout under `queue:{name}`:
//! - `:jobs`      HASH   id -> JSON [`JobRecord`] for waiting, running and failed jobs
//! - `:waiting`   ZSET   id scored by ready-at (unix ms); delayed and ready jobs alike
//! - `:active`    ZSET   id scored by lease deadline (unix ms)
//! - `:failed`    LIST   ids of permanently failed jobs, newest first, capped
//! - `:done:{id}` STRING JSON record of a completed job, expiring after retention
//!
//! Submission, claiming and stall recovery run as Lua scripts so that the
//! dedup check and the move between sets are atomic across competing API and
//! worker processes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::Script;
use redis::aio::ConnectionManager;

use crate::backend::JobQueue;
use crate::error::QueueError;
use crate::job::{EnqueueOutcome, FailOutcome, JobRecord, JobState, QueueCounts};
use crate::policy::SchedulingPolicy;

/// Default time a claimed job may run before it is considered stalled.
const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Default time a completed job stays readable and keeps deduplicating its id.
const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 3600);

const DEFAULT_FAILED_CAP: usize = 1000;

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 then
  return 0
end
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
  return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return 1
"#;

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[2], tonumber(ARGV[1]) + tonumber(ARGV[2]), id)
return redis.call('HGET', KEYS[3], id)
"#;

// Writes back a job whose lease expired. A job completed meanwhile has left
// the hash and is not resurrected. ARGV[3] is the ready-at score, empty when
// the job has no attempts left.
const REQUEUE_STALLED_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
if ARGV[3] == '' then
  redis.call('LPUSH', KEYS[3], ARGV[1])
else
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
end
return 1
"#;

const TRIM_FAILED_SCRIPT: &str = r#"
local dropped = redis.call('LRANGE', KEYS[1], ARGV[1], -1)
if #dropped == 0 then
  return 0
end
redis.call('LTRIM', KEYS[1], 0, tonumber(ARGV[1]) - 1)
for _, id in ipairs(dropped) do
  redis.call('HDEL', KEYS[2], id)
end
return #dropped
"#;

const STALLED_ERROR: &str = "lease expired";

pub struct RedisJobQueue {
    name: String,
    conn: ConnectionManager,
    lease: Duration,
    completed_retention: Duration,
    failed_cap: usize,
    enqueue_script: Script,
    claim_script: Script,
    requeue_stalled_script: Script,
    trim_failed_script: Script,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conn,
            lease: DEFAULT_LEASE,
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            failed_cap: DEFAULT_FAILED_CAP,
            enqueue_script: Script::new(ENQUEUE_SCRIPT),
            claim_script: Script::new(CLAIM_SCRIPT),
            requeue_stalled_script: Script::new(REQUEUE_STALLED_SCRIPT),
            trim_failed_script: Script::new(TRIM_FAILED_SCRIPT),
        }
    }

    /// Override how long a claimed job may run before recovery re-queues it.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// How long a completed job stays readable and blocks resubmission of its id.
    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention.max(Duration::from_millis(1));
        self
    }

    /// Keep at most `cap` permanently failed jobs; older ones are forgotten.
    pub fn with_failed_cap(mut self, cap: usize) -> Self {
        self.failed_cap = cap.max(1);
        self
    }

    fn key(&self, suffix: &str) -> String {
        format!("queue:{}:{}", self.name, suffix)
    }

    fn done_key(&self, id: &str) -> String {
        format!("queue:{}:done:{}", self.name, id)
    }

    async fn load(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let (live, done): (Option<String>, Option<String>) = redis::pipe()
            .cmd("HGET")
            .arg(self.key("jobs"))
            .arg(id)
            .cmd("GET")
            .arg(self.done_key(id))
            .query_async(&mut conn)
            .await?;
        live.or(done)
            .map(|r| serde_json::from_str(&r).map_err(QueueError::from))
            .transpose()
    }

    async fn trim_failed(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let dropped: i64 = self
            .trim_failed_script
            .key(self.key("failed"))
            .key(self.key("jobs"))
            .arg(self.failed_cap as i64)
            .invoke_async(&mut conn)
            .await?;
        if dropped > 0 {
            tracing::debug!(queue = %self.name, dropped, "Oldest failed jobs dropped");
        }
        Ok(())
    }

    async fn load_required(&self, id: &str) -> Result<JobRecord, QueueError> {
        self.load(id)
            .await?
            .ok_or_else(|| QueueError::UnknownJob(id.to_string()))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        id: &str,
        payload: serde_json::Value,
        policy: SchedulingPolicy,
    ) -> Result<EnqueueOutcome, QueueError> {
        let record = JobRecord::new(id, payload, policy);
        let ready_at = now_ms() + policy.delay_ms as i64;

        let mut conn = self.conn.clone();
        let inserted: i64 = self
            .enqueue_script
            .key(self.key("jobs"))
            .key(self.key("waiting"))
            .key(self.done_key(id))
            .arg(id)
            .arg(serde_json::to_string(&record)?)
            .arg(ready_at)
            .invoke_async(&mut conn)
            .await?;

        Ok(if inserted == 1 {
            EnqueueOutcome::Enqueued
        } else {
            EnqueueOutcome::Duplicate
        })
    }

    async fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .claim_script
            .key(self.key("waiting"))
            .key(self.key("active"))
            .key(self.key("jobs"))
            .arg(now_ms())
            .arg(self.lease.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut record: JobRecord = serde_json::from_str(&raw)?;
        record.state = JobState::Active;

        let _: () = redis::cmd("HSET")
            .arg(self.key("jobs"))
            .arg(&record.id)
            .arg(serde_json::to_string(&record)?)
            .query_async(&mut conn)
            .await?;

        Ok(Some(record))
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut record = self.load_required(id).await?;
        record.state = JobState::Completed;
        record.finished_at = Some(Utc::now());

        // A job recovered from a stalled lease may be back in waiting.
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.done_key(id))
            .arg(serde_json::to_string(&record)?)
            .arg("PX")
            .arg(self.completed_retention.as_millis() as i64)
            .ignore()
            .cmd("HDEL")
            .arg(self.key("jobs"))
            .arg(id)
            .ignore()
            .cmd("ZREM")
            .arg(self.key("active"))
            .arg(id)
            .ignore()
            .cmd("ZREM")
            .arg(self.key("waiting"))
            .arg(id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let mut record = self.load_required(id).await?;
        record.attempts_made += 1;
        record.last_error = Some(error.to_string());
        let attempts_made = record.attempts_made;

        let retry_in = if retryable {
            record.policy.retry_delay(attempts_made)
        } else {
            None
        };

        let mut pipe = redis::pipe();
        pipe.atomic();

        let outcome = match retry_in {
            Some(delay) => {
                record.state = JobState::Delayed;
                pipe.cmd("ZADD")
                    .arg(self.key("waiting"))
                    .arg(now_ms() + delay.as_millis() as i64)
                    .arg(id)
                    .ignore();
                FailOutcome::Retrying {
                    attempts_made,
                    retry_in: delay,
                }
            }
            None => {
                record.state = JobState::Failed;
                record.finished_at = Some(Utc::now());
                pipe.cmd("LPUSH").arg(self.key("failed")).arg(id).ignore();
                if retryable {
                    FailOutcome::Exhausted { attempts_made }
                } else {
                    FailOutcome::Rejected { attempts_made }
                }
            }
        };

        pipe.cmd("HSET")
            .arg(self.key("jobs"))
            .arg(id)
            .arg(serde_json::to_string(&record)?)
            .ignore()
            .cmd("ZREM")
            .arg(self.key("active"))
            .arg(id)
            .ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        if retry_in.is_none() {
            self.trim_failed().await?;
        }
        Ok(outcome)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(None);
        };

        if record.state == JobState::Delayed {
            let mut conn = self.conn.clone();
            let score: Option<f64> = redis::cmd("ZSCORE")
                .arg(self.key("waiting"))
                .arg(id)
                .query_async(&mut conn)
                .await?;
            if matches!(score, Some(s) if s as i64 <= now_ms()) {
                record.state = JobState::Waiting;
            }
        }

        Ok(Some(record))
    }

    async fn next_ready_in(&self) -> Result<Option<Duration>, QueueError> {
        let mut conn = self.conn.clone();
        let head: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.key("waiting"))
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        Ok(head.first().map(|(_, score)| {
            let wait_ms = (*score as i64 - now_ms()).max(0);
            Duration::from_millis(wait_ms as u64)
        }))
    }

    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key("active"))
            .arg("-inf")
            .arg(now_ms())
            .query_async(&mut conn)
            .await?;

        let mut recovered = 0;
        let mut failed = false;
        for id in expired {
            // Another process may have recovered or finished it already
            let removed: i64 = redis::cmd("ZREM")
                .arg(self.key("active"))
                .arg(&id)
                .query_async(&mut conn)
                .await?;
            if removed == 0 {
                continue;
            }
            let Some(mut record) = self.load(&id).await? else {
                continue;
            };
            if record.state == JobState::Completed {
                continue;
            }

            record.attempts_made += 1;
            record.last_error = Some(STALLED_ERROR.to_string());
            let ready_at = match record.policy.retry_delay(record.attempts_made) {
                Some(delay) => {
                    record.state = JobState::Delayed;
                    (now_ms() + delay.as_millis() as i64).to_string()
                }
                None => {
                    record.state = JobState::Failed;
                    record.finished_at = Some(Utc::now());
                    String::new()
                }
            };

            let written: i64 = self
                .requeue_stalled_script
                .key(self.key("jobs"))
                .key(self.key("waiting"))
                .key(self.key("failed"))
                .arg(&id)
                .arg(serde_json::to_string(&record)?)
                .arg(&ready_at)
                .invoke_async(&mut conn)
                .await?;
            if written == 0 {
                continue;
            }

            recovered += 1;
            failed |= record.state == JobState::Failed;
            tracing::warn!(
                queue = %self.name,
                job_id = %id,
                attempts_made = record.attempts_made,
                state = ?record.state,
                "Stalled job recovered"
            );
        }

        if failed {
            self.trim_failed().await?;
        }
        Ok(recovered)
    }

    async fn failed_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(self.key("failed"))
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raws: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.key("jobs"))
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        raws.into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(QueueError::from))
            .collect()
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut conn = self.conn.clone();
        let (waiting, active, failed): (usize, usize, usize) = redis::pipe()
            .cmd("ZCARD")
            .arg(self.key("waiting"))
            .cmd("ZCARD")
            .arg(self.key("active"))
            .cmd("LLEN")
            .arg(self.key("failed"))
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            waiting,
            active,
            failed,
        })
    }
}
