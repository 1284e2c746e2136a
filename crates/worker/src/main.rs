use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use orderalert_common::config::AppConfig;
use orderalert_common::db;
use orderalert_common::redis_pool::create_redis_pool;
use orderalert_notifier::{HttpBridgeProvider, SharedSessionManager};
use orderalert_worker::runtime::WorkerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orderalert_worker=info,orderalert_queue=info,orderalert_engine=debug,orderalert_notifier=info"
                    .into()
            }),
        )
        .json()
        .init();

    tracing::info!("OrderAlert worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let redis = create_redis_pool(&config.redis_url).await?;

    let provider = HttpBridgeProvider::new(
        &config.wa_gateway_url,
        &config.wa_session_id,
        config.provider_timeout(),
    )?;
    let sessions = Arc::new(SharedSessionManager::new(Arc::new(provider)));

    let runtime = WorkerRuntime::new(pool, redis, &config, sessions)?;

    let cancel = CancellationToken::new();
    let handle = runtime.spawn(cancel.clone());

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal, finishing in-flight jobs..."),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal, stopping"),
    }
    cancel.cancel();
    handle.join().await;

    tracing::info!("OrderAlert worker stopped.");
    Ok(())
}
