//! Channel membership and notification fan-out, within one server and
//! across servers sharing a broker hub.

mod common;

use std::sync::Arc;

use chansync_server::{BrokerHub, Config, LocalBroker, MemoryStore, SchemaRegistry};
use common::{assert_idle, next_notification, record, request, start};
use serde_json::json;

fn single_server() -> (Arc<LocalBroker>, Arc<chansync_server::SyncServer>) {
    let broker = Arc::new(LocalBroker::standalone(64));
    let server = start(
        Config::default(),
        Arc::new(MemoryStore::new()),
        broker.clone(),
        SchemaRegistry::empty(),
    );
    (broker, server)
}

#[tokio::test]
async fn type_subscribers_see_creates() {
    let (_broker, server) = single_server();
    let (watcher, mut watcher_rx) = server.connect();
    let (writer, mut writer_rx) = server.connect();

    let joined = request(&server, watcher, json!({"model": {"type": "todo"}, "options": {"method": "subscribe"}})).await;
    assert!(joined.error.is_none());
    assert_eq!(joined.options.method, "subscribed");
    assert_eq!(joined.options.channel.as_deref(), Some("todo"));

    record(
        &request(
            &server,
            writer,
            json!({"model": {"type": "todo", "content": "buy milk"}, "options": {"method": "create"}}),
        )
        .await,
    );

    let note = next_notification(&mut watcher_rx).await;
    assert_eq!(note.options.method, "created");
    assert_eq!(note.options.channel.as_deref(), Some("todo"));
    assert_eq!(note.options.record_type.as_deref(), Some("todo"));
    assert_eq!(note.model.as_record().and_then(|r| r.id()).as_deref(), Some("1"));

    assert_idle(&mut watcher_rx);
    assert_idle(&mut writer_rx);
}

#[tokio::test]
async fn instance_and_type_channels_both_hear_updates() {
    let (_broker, server) = single_server();
    let (instance, mut instance_rx) = server.connect();
    let (typed, mut typed_rx) = server.connect();
    let (writer, _writer_rx) = server.connect();

    record(&request(&server, writer, json!({"model": {"type": "todo"}, "options": {"method": "create"}})).await);
    request(&server, instance, json!({"model": {"type": "todo", "id": 1}, "options": {"method": "subscribe"}})).await;
    request(&server, typed, json!({"model": {}, "options": {"method": "subscribe", "channel": "todo"}})).await;

    record(
        &request(
            &server,
            writer,
            json!({"model": {"type": "todo", "id": 1, "done": true}, "options": {"method": "update"}}),
        )
        .await,
    );

    let on_instance = next_notification(&mut instance_rx).await;
    assert_eq!(on_instance.options.method, "updated");
    assert_eq!(on_instance.options.channel.as_deref(), Some("todo:1"));

    let on_type = next_notification(&mut typed_rx).await;
    assert_eq!(on_type.options.method, "updated");
    assert_eq!(on_type.options.channel.as_deref(), Some("todo"));
    assert_eq!(on_type.model.as_record().and_then(|r| r.get("done")), Some(&json!(true)));
}

#[tokio::test]
async fn deletes_publish_the_stored_snapshot() {
    let (_broker, server) = single_server();
    let (watcher, mut rx) = server.connect();
    let (writer, _writer_rx) = server.connect();

    record(
        &request(
            &server,
            writer,
            json!({"model": {"type": "todo", "content": "buy milk"}, "options": {"method": "create"}}),
        )
        .await,
    );
    request(&server, watcher, json!({"model": {"type": "todo", "id": 1}, "options": {"method": "subscribe"}})).await;
    request(&server, writer, json!({"model": {"type": "todo", "id": 1}, "options": {"method": "delete"}})).await;

    let note = next_notification(&mut rx).await;
    assert_eq!(note.options.method, "destroyed");
    assert_eq!(
        note.model.as_record().and_then(|r| r.get("content")),
        Some(&json!("buy milk"))
    );
}

#[tokio::test]
async fn silent_writes_are_not_broadcast() {
    let (_broker, server) = single_server();
    let (watcher, mut rx) = server.connect();
    request(&server, watcher, json!({"model": {"type": "todo"}, "options": {"method": "subscribe"}})).await;

    request(
        &server,
        watcher,
        json!({"model": {"type": "todo", "content": "quiet"}, "options": {"method": "create", "silent": true}}),
    )
    .await;
    request(
        &server,
        watcher,
        json!({"model": {"type": "todo", "content": "loud"}, "options": {"method": "create"}}),
    )
    .await;

    let note = next_notification(&mut rx).await;
    assert_eq!(
        note.model.as_record().and_then(|r| r.get("content")),
        Some(&json!("loud"))
    );
}

#[tokio::test]
async fn publish_reaches_subscribers_without_storing() {
    let store = Arc::new(MemoryStore::new());
    let server = start(
        Config::default(),
        store.clone(),
        Arc::new(LocalBroker::standalone(64)),
        SchemaRegistry::empty(),
    );
    let (watcher, mut rx) = server.connect();
    request(&server, watcher, json!({"model": {}, "options": {"method": "subscribe", "channel": "chat:lobby"}})).await;

    let reply = request(
        &server,
        watcher,
        json!({"model": {"type": "chat", "text": "hello"}, "options": {"method": "publish", "channel": "chat:lobby"}}),
    )
    .await;
    assert_eq!(reply.options.method, "published");

    let note = next_notification(&mut rx).await;
    assert_eq!(note.options.channel.as_deref(), Some("chat:lobby"));
    assert_eq!(note.model.as_record().and_then(|r| r.get("text")), Some(&json!("hello")));
    assert!(store.string_keys().is_empty());
}

#[tokio::test]
async fn broker_subscription_follows_first_join_and_last_leave() {
    let (broker, server) = single_server();
    let (a, mut a_rx) = server.connect();
    let (b, mut b_rx) = server.connect();
    let subscribe = json!({"model": {"type": "todo"}, "options": {"method": "subscribe"}});

    request(&server, a, subscribe.clone()).await;
    request(&server, b, subscribe.clone()).await;
    request(&server, b, subscribe).await;
    assert_eq!(broker.subscriptions(), vec!["todo".to_string()]);

    request(&server, a, json!({"model": {"type": "todo"}, "options": {"method": "unsubscribe"}})).await;
    assert_eq!(broker.subscriptions(), vec!["todo".to_string()]);

    request(&server, a, json!({"model": {"type": "todo"}, "options": {"method": "create"}})).await;
    let note = next_notification(&mut b_rx).await;
    assert_eq!(note.options.method, "created");
    assert_idle(&mut b_rx);
    assert_idle(&mut a_rx);

    server.disconnect(b).await;
    assert!(broker.subscriptions().is_empty());
    assert_eq!(server.router().channel_count().await, 0);
}

#[tokio::test]
async fn notifications_cross_server_instances() {
    let hub = BrokerHub::new();
    let first_broker = hub.attach(64);
    let second_broker = first_broker.hub().attach(64);
    assert_eq!(hub.peer_count(), 2);

    let store = Arc::new(MemoryStore::new());
    let first = start(
        Config::default(),
        store.clone(),
        Arc::new(first_broker),
        SchemaRegistry::empty(),
    );
    let second = start(
        Config::default(),
        store,
        Arc::new(second_broker),
        SchemaRegistry::empty(),
    );

    let (watcher, mut rx) = second.connect();
    request(&second, watcher, json!({"model": {"type": "todo"}, "options": {"method": "subscribe"}})).await;

    let (writer, _writer_rx) = first.connect();
    record(
        &request(
            &first,
            writer,
            json!({"model": {"type": "todo", "content": "shared"}, "options": {"method": "create"}}),
        )
        .await,
    );

    let note = next_notification(&mut rx).await;
    assert_eq!(note.options.method, "created");
    assert_eq!(
        note.model.as_record().and_then(|r| r.get("content")),
        Some(&json!("shared"))
    );

    // Both instances read the same store.
    let listed = request(&second, watcher, json!({"model": {"type": "todo"}, "options": {"method": "read"}})).await;
    assert_eq!(common::records(&listed).len(), 1);
}
