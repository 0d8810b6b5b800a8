//! HTTP endpoints for chansync-server.
//!
//! Serves the WebSocket upgrade plus health and metrics endpoints.

pub mod health;
mod metrics;

use crate::server::SyncServer;
use crate::session::Session;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(server: Arc<SyncServer>) -> Router {
    let config = server.config();
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route(&config.server.ws_path, get(ws_handler));
    if config.http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(server))
}

/// Upgrade to a WebSocket and run a session on it.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(server): Extension<Arc<SyncServer>>,
) -> impl IntoResponse {
    let max = server.config().limits.max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| Session::new(server, socket).run())
}
