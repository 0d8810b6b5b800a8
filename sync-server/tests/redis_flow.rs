//! Two servers that share nothing but a Redis server.
//!
//! Set `CHANSYNC_REDIS_URL` (for example `redis://127.0.0.1:6379/15`) to
//! run these; without it they return early.

mod common;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chansync_server::{Config, RedisBroker, RedisStore, SchemaRegistry, SyncServer};
use common::{assert_idle, next_notification, record, records, request, start};
use serde_json::json;

fn redis_url() -> Option<String> {
    std::env::var("CHANSYNC_REDIS_URL").ok()
}

/// A record type no other test run writes to.
fn unique_type() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("todo{}x{}", std::process::id(), nanos)
}

async fn redis_server(url: &str) -> Arc<SyncServer> {
    let mut config = Config::default();
    config.redis.url = url.to_string();
    let store = Arc::new(RedisStore::connect(url).await.unwrap());
    let broker = Arc::new(RedisBroker::connect(url, 64).await.unwrap());
    start(config, store, broker, SchemaRegistry::empty())
}

#[tokio::test]
async fn writes_on_one_server_notify_watchers_on_another() {
    let Some(url) = redis_url() else { return };
    let first = redis_server(&url).await;
    let second = redis_server(&url).await;
    let ty = unique_type();

    let (watcher, mut watcher_rx) = first.connect();
    let joined = request(&first, watcher, json!({"model": {"type": ty}, "options": {"method": "subscribe"}})).await;
    assert!(joined.error.is_none());

    let (writer, _writer_rx) = second.connect();
    let created = record(
        &request(
            &second,
            writer,
            json!({"model": {"type": ty, "content": "buy milk"}, "options": {"method": "create"}}),
        )
        .await,
    );
    assert_eq!(created.id().as_deref(), Some("1"));

    let note = next_notification(&mut watcher_rx).await;
    assert_eq!(note.options.method, "created");
    assert_eq!(note.options.channel.as_deref(), Some(ty.as_str()));
    assert_eq!(note.model.as_record().and_then(|r| r.get("content").cloned()), Some(json!("buy milk")));
    assert_idle(&mut watcher_rx);

    // Both servers read the same store.
    let listed = records(&request(&first, watcher, json!({"model": {"type": ty}, "options": {"method": "read"}})).await);
    assert_eq!(listed.len(), 1);

    let left = request(&first, watcher, json!({"model": {"type": ty}, "options": {"method": "unsubscribe"}})).await;
    assert!(left.error.is_none());

    record(
        &request(
            &second,
            writer,
            json!({"model": {"type": ty, "id": 1}, "options": {"method": "delete", "silent": true}}),
        )
        .await,
    );
    let listed = records(&request(&first, watcher, json!({"model": {"type": ty}, "options": {"method": "read"}})).await);
    assert!(listed.is_empty());
}
