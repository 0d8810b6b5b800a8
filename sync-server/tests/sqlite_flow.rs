//! Request handling against the SQLite backend.

mod common;

use std::sync::Arc;

use chansync_server::{Config, LocalBroker, SchemaRegistry, SqliteStore, SyncServer, TypeSchema};
use common::{error_kind, record, records, request, start};
use serde_json::json;
use tempfile::TempDir;

fn schemas() -> Arc<SchemaRegistry> {
    SchemaRegistry::builder()
        .register(
            TypeSchema::new("todo")
                .with_index_props(["content"])
                .with_text_props(["content"])
                .with_ext_keys(["owner"]),
        )
        .build()
}

async fn sqlite_server(store: SqliteStore) -> Arc<SyncServer> {
    start(
        Config::default(),
        Arc::new(store),
        Arc::new(LocalBroker::standalone(16)),
        schemas(),
    )
}

#[tokio::test]
async fn crud_round_through_sqlite() {
    let server = sqlite_server(SqliteStore::in_memory().await.unwrap()).await;
    let (conn, _rx) = server.connect();

    for (content, owner) in [("milk", "ann"), ("eggs", "bob"), ("bread", "ann")] {
        record(
            &request(
                &server,
                conn,
                json!({"model": {"type": "todo", "content": content, "owner": owner}, "options": {"method": "create"}}),
            )
            .await,
        );
    }

    let sorted = records(
        &request(
            &server,
            conn,
            json!({"model": {"type": "todo"}, "options": {"method": "read", "sort": {"by": "content"}}}),
        )
        .await,
    );
    let contents: Vec<_> = sorted.iter().filter_map(|r| r.get("content").cloned()).collect();
    assert_eq!(contents, vec![json!("bread"), json!("eggs"), json!("milk")]);

    let anns = records(
        &request(
            &server,
            conn,
            json!({"model": {"type": "todo"}, "options": {"method": "read", "extKey": {"owner": "ann"}}}),
        )
        .await,
    );
    assert_eq!(anns.len(), 2);

    record(&request(&server, conn, json!({"model": {"type": "todo", "id": 2}, "options": {"method": "delete"}})).await);
    let missing = request(&server, conn, json!({"model": {"type": "todo", "id": 2}, "options": {"method": "read"}})).await;
    assert_eq!(error_kind(&missing), "not_found");

    let remaining = records(&request(&server, conn, json!({"model": {"type": "todo"}, "options": {"method": "read"}})).await);
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn records_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chansync.db");

    {
        let server = sqlite_server(SqliteStore::new(&path).await.unwrap()).await;
        let (conn, _rx) = server.connect();
        record(
            &request(
                &server,
                conn,
                json!({"model": {"type": "todo", "content": "persist me"}, "options": {"method": "create"}}),
            )
            .await,
        );
    }

    let server = sqlite_server(SqliteStore::new(&path).await.unwrap()).await;
    let (conn, _rx) = server.connect();
    let found = record(&request(&server, conn, json!({"model": {"type": "todo", "id": 1}, "options": {"method": "read"}})).await);
    assert_eq!(found.get("content"), Some(&json!("persist me")));

    let next = record(&request(&server, conn, json!({"model": {"type": "todo"}, "options": {"method": "create"}})).await);
    assert_eq!(next.id().as_deref(), Some("2"));
}
