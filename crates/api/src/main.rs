//! OrderAlert API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use orderalert_common::config::AppConfig;
use orderalert_common::db::{create_pool, run_migrations};
use orderalert_common::redis_pool::create_redis_pool;
use orderalert_notifier::{HttpBridgeProvider, SharedSessionManager};

use orderalert_api::routes::create_router;
use orderalert_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("orderalert_api=debug,orderalert_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting OrderAlert API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let redis = create_redis_pool(&config.redis_url).await?;

    let provider = HttpBridgeProvider::new(
        &config.wa_gateway_url,
        &config.wa_session_id,
        config.provider_timeout(),
    )?;
    let sessions = Arc::new(SharedSessionManager::new(Arc::new(provider)));

    let port = config.port;
    let state = AppState::new(pool, redis, config, sessions);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
