//! HTTP surface of the notification pipeline.
//!
//! - `POST /webhooks/{resource}/{action}`: signed storefront webhooks
//! - `POST /api/wa/callbacks/*`: signed messaging gateway callbacks
//! - `GET /api/wa/*`, `/api/messages/*`: operator routes behind a JWT

pub mod middleware;
pub mod routes;
pub mod state;
