pub mod callbacks;
pub mod health;
pub mod messages;
pub mod wa;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhooks::router())
        .merge(wa::router())
        .merge(callbacks::router())
        .merge(messages::router())
        .with_state(state)
}
