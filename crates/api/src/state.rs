//! Shared application state for the Axum API server.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use orderalert_common::config::AppConfig;
use orderalert_engine::admission::WebhookAdmission;
use orderalert_engine::idempotency::RedisIdempotencyStore;
use orderalert_engine::pg::PgStore;
use orderalert_engine::queues::{self, EVENT_QUEUE, MESSAGE_QUEUE, redis_queue};
use orderalert_engine::resend::ResendService;
use orderalert_engine::store::{IdempotencyStore, MessageStore, RawEventStore, ShopStore};
use orderalert_engine::tracker::DeliveryTracker;
use orderalert_notifier::SessionManager;
use orderalert_queue::{JobQueue, Queue};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub admission: Arc<WebhookAdmission>,
    pub messages: Arc<dyn MessageStore>,
    pub tracker: Arc<DeliveryTracker>,
    pub resend: Arc<ResendService>,
    pub sessions: Arc<dyn SessionManager>,
}

impl AppState {
    /// Postgres stores, Redis idempotency keys and Redis queues.
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        config: AppConfig,
        sessions: Arc<dyn SessionManager>,
    ) -> Self {
        let store = Arc::new(PgStore::new(pool));
        let idempotency = Arc::new(RedisIdempotencyStore::new(redis.clone()));
        let events = Arc::new(redis_queue(redis.clone(), EVENT_QUEUE, &config));
        let messages = Arc::new(redis_queue(redis, MESSAGE_QUEUE, &config));

        Self::with_backends(config, store, idempotency, events, messages, sessions)
    }

    /// Assemble the services over any store and queue backends.
    pub fn with_backends<S>(
        config: AppConfig,
        store: Arc<S>,
        idempotency: Arc<dyn IdempotencyStore>,
        events: Arc<dyn JobQueue>,
        messages: Arc<dyn JobQueue>,
        sessions: Arc<dyn SessionManager>,
    ) -> Self
    where
        S: ShopStore + RawEventStore + MessageStore + 'static,
    {
        let policy = queues::default_policy(&config);

        let admission = WebhookAdmission::new(
            config.shopify_app_secret.as_bytes(),
            store.clone(),
            store.clone(),
            idempotency,
            Queue::new(events, policy),
            config.idempotency_ttl(),
        );
        let tracker = DeliveryTracker::new(store.clone(), store.clone());
        let resend = ResendService::new(store.clone(), Queue::new(messages, policy));

        Self {
            config,
            admission: Arc::new(admission),
            messages: store,
            tracker: Arc::new(tracker),
            resend: Arc::new(resend),
            sessions,
        }
    }
}
