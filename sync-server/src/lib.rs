//! # chansync-server
//!
//! Channel-addressed CRUD and pub/sub synchronization server.
//!
//! This crate implements a server that:
//! - Accepts WebSocket connections carrying JSON packets
//! - Persists typed records in a key/value store with secondary indexes
//! - Joins connections to channels and fans out change notifications
//! - Relays notifications between instances through a shared broker
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                         ┌── Client B
//!            │      WebSocket          │
//!            ├────────────────────────►│
//!            │                         │
//!        ┌───┴─────────────────────────┴───┐
//!        │         chansync-server         │
//!        │  dispatcher ─► engine ─► store  │
//!        │       │            │            │
//!        │    router ◄─── bridge ◄─ broker │
//!        └─────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Every packet is `{ "model": ..., "options": { "method": ... } }` where
//! `method` is one of `create`, `read`, `update`, `delete`, `publish`,
//! `subscribe` or `unsubscribe`. Each request gets exactly one reply.
//! Notifications for writes arrive on channels the connection joined.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod broker;
pub mod cleanup;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod http;
pub mod limits;
pub mod router;
pub mod schema;
pub mod server;
pub mod session;
pub mod storage;

pub use broker::{Broker, BrokerHub, LocalBroker, RedisBroker};
pub use config::Config;
pub use error::{ServerError, StorageError};
pub use schema::{Flow, Hook, HookContext, SchemaRegistry, Stage, TypeSchema};
pub use server::SyncServer;
pub use storage::{KvStore, MemoryStore, RedisStore, SqliteStore};
