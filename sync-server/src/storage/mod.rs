//! Key-value store layer for chansync-server.
//!
//! The engine needs a small command set: string get/set/del, per-key
//! counters, sets, prefix scans, sort-by-pattern over a set and an atomic
//! batch. [`KvStore`] names exactly that, so the engine and its tests never
//! depend on a particular backend.

mod memory;
mod redis;
mod sqlite;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use sync_core::{Batch, SortQuery};

/// Trait for key-value store backends.
///
/// Implementations must apply [`KvStore::exec`] atomically: readers see
/// either none or all of a batch's writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string key.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Read many string keys; the result lines up with `keys`.
    async fn mget(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>>;

    /// Increment a counter and return the new value (first call returns 1).
    async fn incr(&self, key: &str) -> StorageResult<i64>;

    /// Whether `member` belongs to `set`.
    async fn sismember(&self, set: &str, member: &str) -> StorageResult<bool>;

    /// Every member of `set`, in ascending order.
    async fn smembers(&self, set: &str) -> StorageResult<Vec<String>>;

    /// Every string key starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Order and page the members of a set.
    ///
    /// Members and weights are read from one consistent view, then handed
    /// to [`SortQuery::apply`].
    async fn sort(&self, query: &SortQuery) -> StorageResult<Vec<String>>;

    /// Apply every op of `batch` or none of them.
    async fn exec(&self, batch: Batch) -> StorageResult<()>;
}
