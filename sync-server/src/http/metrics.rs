//! Prometheus metrics endpoint.

use crate::server::SyncServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(server): Extension<Arc<SyncServer>>) -> impl IntoResponse {
    let m = server.metrics();

    // Gauges
    let connections = server.router().connection_count();
    let channels = server.router().channel_count().await;
    let limiter_keys = server.rate_limits().message_keys_count();

    // Counters
    let requests = m.requests_total.load(Ordering::Relaxed);
    let creates = m.creates_total.load(Ordering::Relaxed);
    let reads = m.reads_total.load(Ordering::Relaxed);
    let updates = m.updates_total.load(Ordering::Relaxed);
    let deletes = m.deletes_total.load(Ordering::Relaxed);
    let publishes = m.publishes_total.load(Ordering::Relaxed);
    let memberships = m.membership_changes_total.load(Ordering::Relaxed);
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let timeouts = m.timeouts_total.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);
    let dropped = server.router().dropped_total();

    let body = format!(
        r#"# HELP chansync_connections_active Number of open connections
# TYPE chansync_connections_active gauge
chansync_connections_active {connections}

# HELP chansync_channels_active Number of channels with local members
# TYPE chansync_channels_active gauge
chansync_channels_active {channels}

# HELP chansync_rate_limiter_keys Connections tracked by the rate limiter
# TYPE chansync_rate_limiter_keys gauge
chansync_rate_limiter_keys {limiter_keys}

# HELP chansync_info Server information
# TYPE chansync_info gauge
chansync_info{{version="{version}"}} 1

# HELP chansync_requests_total Total requests received
# TYPE chansync_requests_total counter
chansync_requests_total {requests}

# HELP chansync_operations_total Successful requests by method
# TYPE chansync_operations_total counter
chansync_operations_total{{method="create"}} {creates}
chansync_operations_total{{method="read"}} {reads}
chansync_operations_total{{method="update"}} {updates}
chansync_operations_total{{method="delete"}} {deletes}
chansync_operations_total{{method="publish"}} {publishes}
chansync_operations_total{{method="membership"}} {memberships}

# HELP chansync_connections_total Total connections accepted
# TYPE chansync_connections_total counter
chansync_connections_total {conns_total}

# HELP chansync_notifications_dropped_total Notifications dropped on full queues
# TYPE chansync_notifications_dropped_total counter
chansync_notifications_dropped_total {dropped}

# HELP chansync_rate_limit_hits_total Total rate limit rejections
# TYPE chansync_rate_limit_hits_total counter
chansync_rate_limit_hits_total {rate_limits}

# HELP chansync_store_timeouts_total Store round-trips that timed out
# TYPE chansync_store_timeouts_total counter
chansync_store_timeouts_total {timeouts}

# HELP chansync_errors_total Total failed requests
# TYPE chansync_errors_total counter
chansync_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
