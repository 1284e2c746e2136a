//! Durable delayed/retrying job queue.
//!
//! Jobs are JSON payloads keyed by a caller-chosen id. Submitting an id that
//! the queue still knows (waiting, running, recently completed or retained as
//! failed) is a no-op, which is how webhook redeliveries collapse into one
//! unit of work. The Redis backend forgets completed jobs after a retention
//! window and keeps only the newest failed ones.
//!
//! - [`SchedulingPolicy`] carries delay, attempt budget and backoff per job
//! - [`JobQueue`] is the storage seam, with [`MemoryJobQueue`] and [`RedisJobQueue`]
//! - [`WorkerPool`] runs a bounded set of workers over a queue, optionally
//!   throttled by a pool-wide [`RateLimiter`]

pub mod backend;
pub mod error;
pub mod job;
pub mod memory;
pub mod policy;
pub mod rate_limit;
pub mod redis_queue;
pub mod worker;

pub use backend::{JobQueue, Queue};
pub use error::{JobError, QueueError};
pub use job::{EnqueueOutcome, FailOutcome, Job, JobRecord, JobState, QueueCounts};
pub use memory::MemoryJobQueue;
pub use policy::{Backoff, SchedulingPolicy};
pub use rate_limit::RateLimiter;
pub use redis_queue::RedisJobQueue;
pub use worker::{JobHandler, JobReport, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
