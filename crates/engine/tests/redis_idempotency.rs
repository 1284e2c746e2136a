//! Redis idempotency store tests.
//!
//! Requires a running Redis server; `REDIS_URL` defaults to the local one.
//! Run with:
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p orderalert-engine --test redis_idempotency -- --ignored --nocapture
//! ```

use std::time::Duration;

use redis::aio::ConnectionManager;
use uuid::Uuid;

use orderalert_engine::idempotency::RedisIdempotencyStore;
use orderalert_engine::store::{IdempotencyStore, webhook_key};

// ============================================================
// Shared helpers
// ============================================================

async fn connect() -> ConnectionManager {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    redis::Client::open(url)
        .unwrap()
        .get_connection_manager()
        .await
        .unwrap()
}

fn fresh_key() -> String {
    webhook_key(&Uuid::new_v4().to_string())
}

// ============================================================
// Record and expiry
// ============================================================

#[tokio::test]
#[ignore]
async fn test_record_is_first_writer_wins() {
    let store = RedisIdempotencyStore::new(connect().await);
    let key = fresh_key();

    assert!(!store.contains(&key).await.unwrap());
    assert!(store.record(&key, Duration::from_secs(60)).await.unwrap());
    assert!(!store.record(&key, Duration::from_secs(60)).await.unwrap());
    assert!(store.contains(&key).await.unwrap());

    store.release(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_concurrent_record_claims_once() {
    let conn = connect().await;
    let first = RedisIdempotencyStore::new(conn.clone());
    let second = RedisIdempotencyStore::new(conn);
    let key = fresh_key();

    let (a, b) = tokio::join!(
        first.record(&key, Duration::from_secs(60)),
        second.record(&key, Duration::from_secs(60)),
    );
    assert!(a.unwrap() ^ b.unwrap());

    first.release(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_key_expires_after_ttl() {
    let store = RedisIdempotencyStore::new(connect().await);
    let key = fresh_key();

    assert!(store.record(&key, Duration::from_secs(1)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!store.contains(&key).await.unwrap());
    assert!(store.record(&key, Duration::from_secs(1)).await.unwrap());

    store.release(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_refresh_extends_and_release_forgets() {
    let store = RedisIdempotencyStore::new(connect().await);
    let key = fresh_key();

    store.record(&key, Duration::from_secs(1)).await.unwrap();
    store.refresh(&key, Duration::from_secs(60)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(store.contains(&key).await.unwrap());

    store.release(&key).await.unwrap();
    assert!(!store.contains(&key).await.unwrap());
    assert!(store.record(&key, Duration::from_secs(60)).await.unwrap());

    store.release(&key).await.unwrap();
}
