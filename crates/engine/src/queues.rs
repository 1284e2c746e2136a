//! Names and default scheduling of the two pipeline queues, shared by the
//! API (producer of events) and the worker (consumer of both).

use redis::aio::ConnectionManager;

use orderalert_common::config::AppConfig;
use orderalert_queue::{Backoff, RedisJobQueue, SchedulingPolicy};

/// Admitted webhooks waiting for the event processor.
pub const EVENT_QUEUE: &str = "webhook-events";

/// Rendered-and-send jobs waiting for the dispatcher.
pub const MESSAGE_QUEUE: &str = "messages";

pub fn default_policy(config: &AppConfig) -> SchedulingPolicy {
    SchedulingPolicy::new(
        config.job_max_attempts,
        Backoff::exponential(config.job_backoff_base()),
    )
}

/// Redis backend for a pipeline queue, with retention taken from config.
pub fn redis_queue(conn: ConnectionManager, name: &str, config: &AppConfig) -> RedisJobQueue {
    RedisJobQueue::new(conn, name)
        .with_completed_retention(config.queue_completed_retention())
        .with_failed_cap(config.queue_failed_cap)
}
