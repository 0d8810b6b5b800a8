//! Main SyncServer coordination.
//!
//! SyncServer wires the store, broker, router, bridge, engine and
//! dispatcher together and handles the request path shared by every
//! transport: size check, rate limits, parse, dispatch, reply.

use crate::bridge::PubSubBridge;
use crate::broker::Broker;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::engine::Engine;
use crate::limits::RateLimits;
use crate::router::ChannelRouter;
use crate::schema::SchemaRegistry;
use crate::storage::KvStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_types::{ConnectionId, Method, Options, Packet, SyncError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Operational metrics for monitoring server activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total requests received (before validation).
    pub requests_total: AtomicU64,
    /// Successful creates.
    pub creates_total: AtomicU64,
    /// Successful reads.
    pub reads_total: AtomicU64,
    /// Successful updates.
    pub updates_total: AtomicU64,
    /// Successful deletes.
    pub deletes_total: AtomicU64,
    /// Successful publishes.
    pub publishes_total: AtomicU64,
    /// Successful subscribes and unsubscribes.
    pub membership_changes_total: AtomicU64,
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total rate limit rejections (message + global).
    pub rate_limit_hits: AtomicU64,
    /// Store round-trips that exceeded the timeout.
    pub timeouts_total: AtomicU64,
    /// Total failed requests, rate limits and timeouts included.
    pub errors_total: AtomicU64,
}

impl ServerMetrics {
    /// Count a successful request.
    pub fn record(&self, method: Method) {
        let counter = match method {
            Method::Create => &self.creates_total,
            Method::Read => &self.reads_total,
            Method::Update => &self.updates_total,
            Method::Delete => &self.deletes_total,
            Method::Publish => &self.publishes_total,
            Method::Subscribe | Method::Unsubscribe => &self.membership_changes_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, err: &SyncError) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        match err {
            SyncError::RateLimited(_) => {
                self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            }
            SyncError::Timeout => {
                self.timeouts_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

/// Main sync server.
pub struct SyncServer {
    config: Config,
    store: Arc<dyn KvStore>,
    router: Arc<ChannelRouter>,
    bridge: Arc<PubSubBridge>,
    engine: Arc<Engine>,
    dispatcher: Dispatcher,
    schemas: Arc<SchemaRegistry>,
    /// Rate limiters for inbound requests.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: Arc<ServerMetrics>,
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.router.connection_count())
            .finish_non_exhaustive()
    }
}

impl SyncServer {
    /// Create a new SyncServer over a store and a broker.
    ///
    /// Call [`SyncServer::spawn_bridge`] before serving traffic.
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        broker: Arc<dyn Broker>,
        schemas: Arc<SchemaRegistry>,
    ) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let metrics = Arc::new(ServerMetrics::default());
        let router = Arc::new(ChannelRouter::new(broker.clone()));
        let bridge = Arc::new(PubSubBridge::new(
            broker,
            router.clone(),
            config.pubsub.announce_membership,
        ));
        let engine = Arc::new(Engine::new(
            store.clone(),
            bridge.clone(),
            schemas.clone(),
            config.store_timeout(),
        ));
        let dispatcher = Dispatcher::new(
            engine.clone(),
            router.clone(),
            schemas.clone(),
            metrics.clone(),
        );

        Self {
            config,
            store,
            router,
            bridge,
            engine,
            dispatcher,
            schemas,
            rate_limits,
            metrics,
        }
    }

    /// Start delivering broker messages to local connections.
    pub fn spawn_bridge(&self) -> JoinHandle<()> {
        self.bridge.spawn_listener()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Get access to the channel router.
    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    /// Get access to the engine, for server-side calls that bypass hooks.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Get access to the schema registry.
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Register a new connection and return its id and outbound queue.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Packet>) {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::channel(self.config.limits.outbound_buffer.max(1));
        self.router.register(id, tx);
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Registered connection {}", id);
        (id, rx)
    }

    /// Drop a connection and leave all of its channels.
    pub async fn disconnect(&self, id: ConnectionId) {
        self.router.disconnect(id).await;
    }

    /// Handle one raw text frame from `connection`. Always yields a reply.
    pub async fn handle_text(&self, connection: ConnectionId, text: &str) -> Packet {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.admit(connection, text.len()) {
            return self.fail(&Options::default(), err);
        }

        let packet = match Packet::from_json(text) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::debug!("Malformed packet from {}: {}", connection, err);
                return self.fail(&Options::default(), err);
            }
        };

        self.dispatch(Some(connection), packet).await
    }

    /// Reply to a frame that is not a text frame.
    pub fn reject_binary(&self, connection: ConnectionId, len: usize) -> Packet {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Binary frame of {} bytes from {}", len, connection);
        self.fail(
            &Options::default(),
            SyncError::InvalidPacket("binary frames are not supported".into()),
        )
    }

    /// Handle one parsed request. Always yields a reply.
    pub async fn handle_packet(&self, connection: Option<ConnectionId>, packet: Packet) -> Packet {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        self.dispatch(connection, packet).await
    }

    async fn dispatch(&self, connection: Option<ConnectionId>, packet: Packet) -> Packet {
        let request = packet.options.clone();
        match self.dispatcher.process(connection, packet).await {
            Ok(reply) => reply,
            Err(err) => self.fail(&request, err),
        }
    }

    fn admit(&self, connection: ConnectionId, size: usize) -> Result<(), SyncError> {
        let max = self.config.limits.max_message_size;
        if size > max {
            return Err(SyncError::InvalidPacket(format!(
                "frame of {size} bytes exceeds limit of {max}"
            )));
        }
        if let Err(e) = self.rate_limits.check_global() {
            tracing::warn!("Global rate limit exceeded: {}", e);
            return Err(e.into());
        }
        if let Err(e) = self.rate_limits.check_message(connection) {
            tracing::warn!("Message rate limited for {}: {}", connection, e);
            return Err(e.into());
        }
        Ok(())
    }

    fn fail(&self, request: &Options, err: SyncError) -> Packet {
        self.metrics.record_error(&err);
        match &err {
            SyncError::Store(_) | SyncError::Timeout => {
                tracing::warn!("Request {:?} failed: {}", request.method, err)
            }
            _ => tracing::debug!("Request {:?} rejected: {}", request.method, err),
        }
        Packet::error_reply(request, &err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::config::LimitsConfig;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn server_with(config: Config) -> SyncServer {
        SyncServer::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(LocalBroker::standalone(64)),
            SchemaRegistry::empty(),
        )
    }

    fn server() -> SyncServer {
        server_with(Config::default())
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let server = server();
        let (id, _rx) = server.connect();
        assert_eq!(server.router().connection_count(), 1);
        assert_eq!(server.metrics().connections_total.load(Ordering::Relaxed), 1);

        server.disconnect(id).await;
        assert_eq!(server.router().connection_count(), 0);
    }

    #[tokio::test]
    async fn malformed_text_yields_error_reply() {
        let server = server();
        let (id, _rx) = server.connect();

        let reply = server.handle_text(id, "{nope").await;
        assert_eq!(reply.error.unwrap().kind, "invalid_packet");
        assert_eq!(server.metrics().errors_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let mut config = Config::default();
        config.limits.max_message_size = 16;
        let server = server_with(config);
        let (id, _rx) = server.connect();

        let text = json!({"model": {"type": "todo", "content": "too long"}, "options": {"method": "create"}})
            .to_string();
        let reply = server.handle_text(id, &text).await;
        assert_eq!(reply.error.unwrap().kind, "invalid_packet");
        assert_eq!(server.metrics().creates_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn rate_limited_connection_gets_error_replies() {
        let mut config = Config::default();
        config.limits = LimitsConfig {
            messages_per_minute: 2,
            ..LimitsConfig::default()
        };
        let server = server_with(config);
        let (id, _rx) = server.connect();
        let text = json!({"model": {"type": "todo", "id": 1}, "options": {"method": "read"}})
            .to_string();

        for _ in 0..2 {
            let reply = server.handle_text(id, &text).await;
            assert_eq!(reply.error.unwrap().kind, "not_found");
        }
        let reply = server.handle_text(id, &text).await;
        assert_eq!(reply.error.unwrap().kind, "rate_limited");
        assert_eq!(server.metrics().rate_limit_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn server_side_requests_need_no_connection() {
        let server = server();
        let packet = Packet::from_json(
            &json!({"model": {"type": "todo", "content": "seeded"}, "options": {"method": "create"}})
                .to_string(),
        )
        .unwrap();

        let reply = server.handle_packet(None, packet).await;
        assert!(reply.error.is_none());
        assert!(server.store().get("todo:1").await.unwrap().is_some());

        let subscribe = Packet::from_json(
            &json!({"model": {"type": "todo"}, "options": {"method": "subscribe"}}).to_string(),
        )
        .unwrap();
        let reply = server.handle_packet(None, subscribe).await;
        assert_eq!(reply.error.unwrap().kind, "invalid_packet");
    }

    #[tokio::test]
    async fn successful_requests_are_counted_per_method() {
        let server = server();
        let (id, _rx) = server.connect();
        let create = json!({"model": {"type": "todo"}, "options": {"method": "create", "requestId": "a"}})
            .to_string();

        let reply = server.handle_text(id, &create).await;
        assert!(reply.error.is_none());
        assert_eq!(reply.options.request_id, Some(json!("a")));
        assert_eq!(server.metrics().creates_total.load(Ordering::Relaxed), 1);
        assert_eq!(server.metrics().requests_total.load(Ordering::Relaxed), 1);
    }
}
