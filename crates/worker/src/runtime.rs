//! Worker process wiring.
//!
//! Pool A drains the event queue through the [`EventProcessor`]; pool B
//! drains the message queue through the [`MessageDispatcher`] behind one
//! rate limiter shared by all of its workers. Every messaging session's
//! event stream feeds the [`DeliveryTracker`].

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use orderalert_common::config::AppConfig;
use orderalert_common::error::AppError;
use orderalert_common::types::{MessageJob, NormalizedEvent};
use orderalert_engine::dispatcher::MessageDispatcher;
use orderalert_engine::idempotency::RedisIdempotencyStore;
use orderalert_engine::pg::PgStore;
use orderalert_engine::processor::{EventProcessor, ProcessorConfig};
use orderalert_engine::queues::{self, EVENT_QUEUE, MESSAGE_QUEUE, redis_queue};
use orderalert_engine::store::{IdempotencyStore, MessageStore, ShopStore, TemplateStore};
use orderalert_engine::tracker::DeliveryTracker;
use orderalert_notifier::SessionManager;
use orderalert_queue::{
    JobHandler, JobQueue, Queue, RateLimiter, WorkerPool, WorkerPoolConfig,
    WorkerPoolHandle,
};

use crate::session_monitor::SessionMonitor;

/// Pool sizes and timings, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub event_concurrency: usize,
    pub message_concurrency: usize,
    /// Minimum spacing between two sends across pool B.
    pub message_rate_limit: Duration,
    pub provider_timeout: Duration,
    pub session_poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            event_concurrency: config.event_worker_concurrency,
            message_concurrency: config.message_worker_concurrency,
            message_rate_limit: config.message_rate_limit(),
            provider_timeout: config.provider_timeout(),
            session_poll_interval: config.wa_status_poll_interval(),
        }
    }
}

pub struct WorkerRuntime {
    events: Arc<dyn JobQueue>,
    messages: Arc<dyn JobQueue>,
    processor: Arc<EventProcessor>,
    dispatcher: Arc<MessageDispatcher>,
    tracker: Arc<DeliveryTracker>,
    sessions: Arc<dyn SessionManager>,
    settings: WorkerSettings,
}

impl WorkerRuntime {
    /// Postgres stores, Redis idempotency keys and Redis queues.
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        config: &AppConfig,
        sessions: Arc<dyn SessionManager>,
    ) -> Result<Self, AppError> {
        let store = Arc::new(PgStore::new(pool));
        let idempotency = Arc::new(RedisIdempotencyStore::new(redis.clone()));
        let events = Arc::new(redis_queue(redis.clone(), EVENT_QUEUE, config));
        let messages = Arc::new(redis_queue(redis, MESSAGE_QUEUE, config));

        Self::with_backends(config, store, idempotency, events, messages, sessions)
    }

    pub fn with_backends<S>(
        config: &AppConfig,
        store: Arc<S>,
        idempotency: Arc<dyn IdempotencyStore>,
        events: Arc<dyn JobQueue>,
        messages: Arc<dyn JobQueue>,
        sessions: Arc<dyn SessionManager>,
    ) -> Result<Self, AppError>
    where
        S: ShopStore + TemplateStore + MessageStore + 'static,
    {
        let default_timezone: Tz = config.default_timezone.parse().map_err(|_| {
            AppError::Config(format!(
                "DEFAULT_TIMEZONE '{}' is not a known timezone",
                config.default_timezone
            ))
        })?;
        let settings = WorkerSettings::from_config(config);

        let processor = EventProcessor::new(
            store.clone(),
            idempotency,
            Queue::new(messages.clone(), queues::default_policy(config)),
            ProcessorConfig {
                default_confirm_delay_minutes: config.default_confirm_delay_minutes,
                default_timezone,
                idempotency_ttl: config.idempotency_ttl(),
            },
        );
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            store.clone(),
            sessions.clone(),
            settings.provider_timeout,
        );
        let tracker = DeliveryTracker::new(store.clone(), store);

        Ok(Self {
            events,
            messages,
            processor: Arc::new(processor),
            dispatcher: Arc::new(dispatcher),
            tracker: Arc::new(tracker),
            sessions,
            settings,
        })
    }

    /// Start every background task. All of them stop once `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> RuntimeHandle {
        let event_pool = WorkerPool::new(
            self.events.clone(),
            self.processor.clone() as Arc<dyn JobHandler<NormalizedEvent>>,
            WorkerPoolConfig::with_concurrency(self.settings.event_concurrency),
        )
        .spawn(cancel.clone());

        let limiter = Arc::new(RateLimiter::new(self.settings.message_rate_limit));
        let message_pool = WorkerPool::new(
            self.messages.clone(),
            self.dispatcher.clone() as Arc<dyn JobHandler<MessageJob>>,
            WorkerPoolConfig::with_concurrency(self.settings.message_concurrency),
        )
        .with_rate_limiter(limiter)
        .spawn(cancel.clone());

        let mut tasks = Vec::new();
        for provider in self.sessions.providers() {
            tracing::info!(session_id = provider.session_id(), "Tracking messaging session");
            let tracker = self.tracker.clone();
            tasks.push(tokio::spawn(
                tracker.run(provider.subscribe(), cancel.clone()),
            ));
        }

        let monitor = SessionMonitor::new(self.sessions.clone(), self.settings.session_poll_interval);
        tasks.push(tokio::spawn(monitor.run(cancel)));

        RuntimeHandle {
            pools: vec![event_pool, message_pool],
            tasks,
        }
    }
}

/// Handle to a spawned runtime.
pub struct RuntimeHandle {
    pools: Vec<WorkerPoolHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Wait for every pool to finish its in-flight jobs and every task to stop.
    pub async fn join(self) {
        for pool in self.pools {
            pool.join().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}
