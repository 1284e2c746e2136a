//! Idempotency stores.
//!
//! The Redis store uses `SET key 1 NX EX ttl` so that check-and-record is a
//! single atomic command with automatic expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

use orderalert_common::error::AppError;

use crate::store::IdempotencyStore;

const KEY_PREFIX: &str = "idempotency";

pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
}

impl RedisIdempotencyStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(key: &str) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn contains(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::key(key)).await?;
        Ok(exists)
    }

    async fn record(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();

        // Some("OK") when newly set, None when the key already existed
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::key(key))
            .arg("1")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(key)).await?;
        Ok(())
    }
}

/// In-process idempotency store with the same expiry semantics.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    keys: Mutex<HashMap<String, Instant>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn contains(&self, key: &str) -> Result<bool, AppError> {
        let keys = self.keys.lock().await;
        Ok(keys.get(key).is_some_and(|exp| *exp > Instant::now()))
    }

    async fn record(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut keys = self.keys.lock().await;
        let now = Instant::now();
        if keys.get(key).is_some_and(|exp| *exp > now) {
            return Ok(false);
        }
        keys.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        self.keys
            .lock()
            .await
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), AppError> {
        self.keys.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_record_is_check_and_set() {
        let store = MemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);

        assert!(!store.contains("webhook:wh-1").await.unwrap());
        assert!(store.record("webhook:wh-1", ttl).await.unwrap());
        assert!(!store.record("webhook:wh-1", ttl).await.unwrap());
        assert!(store.contains("webhook:wh-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_and_release() {
        let store = MemoryIdempotencyStore::new();
        store.record("webhook:wh-1", Duration::from_secs(60)).await.unwrap();
        store.refresh("webhook:wh-1", Duration::from_secs(600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(store.contains("webhook:wh-1").await.unwrap());

        store.release("webhook:wh-1").await.unwrap();
        assert!(!store.contains("webhook:wh-1").await.unwrap());
        assert!(store.record("webhook:wh-1", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire() {
        let store = MemoryIdempotencyStore::new();
        store.record("event:wh-1", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.contains("event:wh-1").await.unwrap());
        assert!(store.record("event:wh-1", Duration::from_secs(60)).await.unwrap());
    }
}
