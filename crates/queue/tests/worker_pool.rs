//! Worker pool behaviour over the in-memory backend, on paused tokio time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use orderalert_queue::{
    Backoff, EnqueueOutcome, FailOutcome, Job, JobError, JobHandler, JobQueue, JobReport,
    JobState, MemoryJobQueue, Queue, RateLimiter, SchedulingPolicy, WorkerPool, WorkerPoolConfig,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

/// Records when each job started; fails the first `failures` attempts of every job.
struct Recorder {
    origin: Instant,
    failures: u32,
    permanent: bool,
    starts: Mutex<Vec<(String, Duration)>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Recorder {
    fn new(failures: u32) -> Self {
        Self {
            origin: Instant::now(),
            failures,
            permanent: false,
            starts: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn starts(&self) -> Vec<(String, Duration)> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler<Ping> for Recorder {
    async fn handle(&self, job: &Job<Ping>) -> Result<(), JobError> {
        self.starts
            .lock()
            .unwrap()
            .push((job.id.clone(), self.origin.elapsed()));

        let seen = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(job.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if seen <= self.failures {
            if self.permanent {
                return Err(JobError::Permanent("bad template".into()));
            }
            return Err(JobError::Retryable("provider timeout".into()));
        }
        Ok(())
    }
}

fn setup(policy: SchedulingPolicy) -> (Arc<MemoryJobQueue>, Queue<Ping>) {
    let backend = Arc::new(MemoryJobQueue::new("test"));
    let queue = Queue::new(backend.clone() as Arc<dyn JobQueue>, policy);
    (backend, queue)
}

async fn run_pool_for(
    backend: Arc<MemoryJobQueue>,
    handler: Arc<Recorder>,
    concurrency: usize,
    limiter: Option<Arc<RateLimiter>>,
    duration: Duration,
) {
    let mut pool = WorkerPool::new(
        backend as Arc<dyn JobQueue>,
        handler as Arc<dyn JobHandler<Ping>>,
        WorkerPoolConfig::with_concurrency(concurrency),
    );
    if let Some(limiter) = limiter {
        pool = pool.with_rate_limiter(limiter);
    }

    let cancel = CancellationToken::new();
    let handle = pool.spawn(cancel.clone());
    tokio::time::sleep(duration).await;
    cancel.cancel();
    handle.join().await;
}

// ============================================================
// Rate limiting
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spaces_sends_across_pool() {
    let (backend, queue) = setup(SchedulingPolicy::default());
    for n in 0..10 {
        queue.submit(&format!("job-{n}"), &Ping { n }).await.unwrap();
    }

    let recorder = Arc::new(Recorder::new(0));
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1500)));
    run_pool_for(
        backend,
        recorder.clone(),
        10,
        Some(limiter),
        Duration::from_secs(30),
    )
    .await;

    let mut starts: Vec<Duration> = recorder.starts().into_iter().map(|(_, at)| at).collect();
    starts.sort();
    assert_eq!(starts.len(), 10);
    assert!(starts[9] >= Duration::from_millis(13_500));
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(1500));
    }
}

#[tokio::test(start_paused = true)]
async fn test_without_limiter_pool_runs_in_parallel() {
    let (backend, queue) = setup(SchedulingPolicy::default());
    for n in 0..5 {
        queue.submit(&format!("job-{n}"), &Ping { n }).await.unwrap();
    }

    let recorder = Arc::new(Recorder::new(0));
    run_pool_for(backend, recorder.clone(), 5, None, Duration::from_secs(5)).await;

    let starts = recorder.starts();
    assert_eq!(starts.len(), 5);
    assert!(starts.iter().all(|(_, at)| *at < Duration::from_secs(1)));
}

// ============================================================
// Delays and retries
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_delayed_job_runs_no_earlier_than_delay() {
    let (backend, queue) = setup(SchedulingPolicy::default());
    queue
        .submit_delayed("cod-confirm", &Ping { n: 1 }, Duration::from_secs(120 * 60))
        .await
        .unwrap();

    let recorder = Arc::new(Recorder::new(0));
    run_pool_for(
        backend.clone(),
        recorder.clone(),
        2,
        None,
        Duration::from_secs(3 * 3600),
    )
    .await;

    let starts = recorder.starts();
    assert_eq!(starts.len(), 1);
    assert!(starts[0].1 >= Duration::from_secs(7200));
    assert_eq!(
        backend.get("cod-confirm").await.unwrap().unwrap().state,
        JobState::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_exponential_backoff_then_success() {
    let policy = SchedulingPolicy::new(5, Backoff::exponential(Duration::from_secs(10)));
    let (backend, queue) = setup(policy);
    queue.submit("job-1", &Ping { n: 1 }).await.unwrap();

    let recorder = Arc::new(Recorder::new(2));
    run_pool_for(
        backend.clone(),
        recorder.clone(),
        1,
        None,
        Duration::from_secs(120),
    )
    .await;

    let starts = recorder.starts();
    assert_eq!(starts.len(), 3);
    assert!(starts[1].1 - starts[0].1 >= Duration::from_secs(10));
    assert!(starts[2].1 - starts[1].1 >= Duration::from_secs(20));

    let record = backend.get("job-1").await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts_made, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_job_lands_in_failed_set() {
    let policy = SchedulingPolicy::new(3, Backoff::fixed(Duration::from_secs(1)));
    let (backend, queue) = setup(policy);
    queue.submit("job-1", &Ping { n: 1 }).await.unwrap();

    let recorder = Arc::new(Recorder::new(u32::MAX));
    run_pool_for(
        backend.clone(),
        recorder.clone(),
        1,
        None,
        Duration::from_secs(60),
    )
    .await;

    assert_eq!(recorder.starts().len(), 3);
    let failed = backend.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "job-1");
    assert_eq!(failed[0].state, JobState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_is_not_retried() {
    let (backend, queue) = setup(SchedulingPolicy::default());
    queue.submit("job-1", &Ping { n: 1 }).await.unwrap();

    let mut recorder = Recorder::new(1);
    recorder.permanent = true;
    let recorder = Arc::new(recorder);

    let pool = WorkerPool::new(
        backend.clone() as Arc<dyn JobQueue>,
        recorder.clone() as Arc<dyn JobHandler<Ping>>,
        WorkerPoolConfig::default(),
    );
    let report = pool.process_next().await.unwrap().unwrap();

    assert_eq!(
        report,
        JobReport::Failed {
            job_id: "job-1".into(),
            outcome: FailOutcome::Rejected { attempts_made: 1 }
        }
    );
    assert!(pool.process_next().await.unwrap().is_none());
}

// ============================================================
// Deduplication and malformed payloads
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_same_job_id_processed_once() {
    let (backend, queue) = setup(SchedulingPolicy::default());
    let first = queue.submit("wh-42", &Ping { n: 1 }).await.unwrap();
    let second = queue.submit("wh-42", &Ping { n: 2 }).await.unwrap();
    assert_eq!(first, EnqueueOutcome::Enqueued);
    assert_eq!(second, EnqueueOutcome::Duplicate);

    let recorder = Arc::new(Recorder::new(0));
    run_pool_for(backend, recorder.clone(), 4, None, Duration::from_secs(5)).await;

    assert_eq!(recorder.starts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_is_rejected_without_calling_handler() {
    let backend = Arc::new(MemoryJobQueue::new("test"));
    backend
        .enqueue(
            "junk",
            serde_json::json!({"unexpected": true}),
            SchedulingPolicy::default(),
        )
        .await
        .unwrap();

    let recorder = Arc::new(Recorder::new(0));
    let pool = WorkerPool::new(
        backend.clone() as Arc<dyn JobQueue>,
        recorder.clone() as Arc<dyn JobHandler<Ping>>,
        WorkerPoolConfig::default(),
    );

    let report = pool.process_next().await.unwrap().unwrap();
    assert!(matches!(
        report,
        JobReport::Failed {
            outcome: FailOutcome::Rejected { .. },
            ..
        }
    ));
    assert!(recorder.starts().is_empty());
}
