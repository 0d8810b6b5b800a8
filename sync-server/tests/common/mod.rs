//! Shared helpers for chansync-server integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chansync_server::{Broker, Config, KvStore, SchemaRegistry, SyncServer};
use serde_json::Value;
use sync_types::{ConnectionId, Model, Packet, Record};
use tokio::sync::mpsc;

/// How long to wait for a notification that should arrive.
pub const DELIVERY: Duration = Duration::from_secs(2);

/// Build a server and start its bridge.
pub fn start(
    config: Config,
    store: Arc<dyn KvStore>,
    broker: Arc<dyn Broker>,
    schemas: Arc<SchemaRegistry>,
) -> Arc<SyncServer> {
    let server = Arc::new(SyncServer::new(config, store, broker, schemas));
    server.spawn_bridge();
    server
}

/// Send one request as a client would and return the reply.
pub async fn request(server: &SyncServer, connection: ConnectionId, packet: Value) -> Packet {
    server.handle_text(connection, &packet.to_string()).await
}

/// The single record of a successful reply.
pub fn record(reply: &Packet) -> Record {
    assert!(reply.error.is_none(), "unexpected error: {:?}", reply.error);
    reply.model.as_record().cloned().expect("single record")
}

/// The records of a successful collection read.
pub fn records(reply: &Packet) -> Vec<Record> {
    assert!(reply.error.is_none(), "unexpected error: {:?}", reply.error);
    match &reply.model {
        Model::Many(records) => records.clone(),
        Model::One(_) => panic!("expected a collection"),
    }
}

/// The error kind of a failed reply.
pub fn error_kind(reply: &Packet) -> String {
    reply.error.as_ref().expect("error reply").kind.clone()
}

/// Wait for the next notification on a connection's queue.
pub async fn next_notification(rx: &mut mpsc::Receiver<Packet>) -> Packet {
    tokio::time::timeout(DELIVERY, rx.recv())
        .await
        .expect("notification timed out")
        .expect("queue closed")
}

/// Assert nothing else is queued right now.
pub fn assert_idle(rx: &mut mpsc::Receiver<Packet>) {
    if let Ok(packet) = rx.try_recv() {
        panic!("unexpected notification: {packet:?}");
    }
}
