use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (job queues + idempotency keys)
    pub redis_url: String,

    /// Port the API server listens on (default: 8080)
    pub port: u16,

    /// Shared secret used to sign storefront webhooks
    pub shopify_app_secret: String,

    /// JWT secret for operator API authentication
    pub jwt_secret: String,

    /// JWT token expiry in hours
    pub jwt_expiry_hours: u64,

    /// Base URL of the messaging gateway bridge
    pub wa_gateway_url: String,

    /// Session used when every shop shares one messaging session
    pub wa_session_id: String,

    /// Shared secret the messaging gateway signs its callbacks with
    pub wa_callback_secret: String,

    /// How often the worker polls the gateway for session state
    pub wa_status_poll_secs: u64,

    /// Timezone applied to shops that have none recorded
    pub default_timezone: String,

    /// COD confirmation delay used when a shop has no settings row
    pub default_confirm_delay_minutes: u32,

    /// Worker pool width for the event queue (default: 5)
    pub event_worker_concurrency: usize,

    /// Worker pool width for the message queue (default: 10)
    pub message_worker_concurrency: usize,

    /// Minimum interval between two message sends across the whole pool
    pub message_rate_limit_ms: u64,

    /// Attempts per job before it is marked permanently failed (default: 5)
    pub job_max_attempts: u32,

    /// Base delay of the exponential retry backoff
    pub job_backoff_base_ms: u64,

    /// Upper bound on a single provider send call
    pub provider_timeout_secs: u64,

    /// How long processed webhook / event ids are remembered
    pub idempotency_ttl_secs: u64,

    /// How long a completed queue job stays readable (and deduplicates its id)
    pub queue_completed_retention_secs: u64,

    /// Most permanently failed jobs kept per queue; older ones are dropped
    pub queue_failed_cap: usize,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: parse_or("PORT", 8080)?,
            shopify_app_secret: required("SHOPIFY_APP_SECRET")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_hours: parse_or("JWT_EXPIRY_HOURS", 24)?,
            wa_gateway_url: std::env::var("WA_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            wa_session_id: std::env::var("WA_SESSION_ID")
                .unwrap_or_else(|_| "default-session".to_string()),
            wa_callback_secret: required("WA_CALLBACK_SECRET")?,
            wa_status_poll_secs: parse_or("WA_STATUS_POLL_SECS", 15)?,
            default_timezone: std::env::var("DEFAULT_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Karachi".to_string()),
            default_confirm_delay_minutes: parse_or("DEFAULT_CONFIRM_DELAY_MINUTES", 120)?,
            event_worker_concurrency: parse_or("EVENT_WORKER_CONCURRENCY", 5)?,
            message_worker_concurrency: parse_or("MESSAGE_WORKER_CONCURRENCY", 10)?,
            message_rate_limit_ms: parse_or("MESSAGE_RATE_LIMIT_MS", 1500)?,
            job_max_attempts: parse_or("JOB_MAX_ATTEMPTS", 5)?,
            job_backoff_base_ms: parse_or("JOB_BACKOFF_BASE_MS", 10_000)?,
            provider_timeout_secs: parse_or("PROVIDER_TIMEOUT_SECS", 30)?,
            idempotency_ttl_secs: parse_or("IDEMPOTENCY_TTL_SECS", 7 * 24 * 3600)?,
            queue_completed_retention_secs: parse_or("QUEUE_COMPLETED_RETENTION_SECS", 24 * 3600)?,
            queue_failed_cap: parse_or("QUEUE_FAILED_CAP", 1000)?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 20)?,
        })
    }

    pub fn message_rate_limit(&self) -> Duration {
        Duration::from_millis(self.message_rate_limit_ms)
    }

    pub fn job_backoff_base(&self) -> Duration {
        Duration::from_millis(self.job_backoff_base_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn wa_status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wa_status_poll_secs.max(1))
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn queue_completed_retention(&self) -> Duration {
        Duration::from_secs(self.queue_completed_retention_secs.max(1))
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{name} environment variable is required"))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
