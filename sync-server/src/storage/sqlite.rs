//! SQLite store backend for chansync-server.
//!
//! Strings, set members and counters live in three tables. A batch runs in
//! one transaction, so it commits or rolls back as a unit.

use super::KvStore;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use sync_core::{Batch, BatchOp, SortQuery};

/// SQLite-based key-value store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // Each connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS set_members (
                set_key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (set_key, member)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }
}

/// Upper bound for a prefix range scan: the prefix with its last char bumped.
///
/// `None` when no such bound exists and the scan must run to the end.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        sqlx::query_scalar("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)
    }

    async fn mget(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?1")
                .bind(key)
                .fetch_optional(&mut *conn)
                .await
                .map_err(StorageError::Database)?;
            values.push(value);
        }
        Ok(values)
    }

    async fn incr(&self, key: &str) -> StorageResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO counters (key, value)
            VALUES (?1, 1)
            ON CONFLICT(key) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)
    }

    async fn sismember(&self, set: &str, member: &str) -> StorageResult<bool> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM set_members WHERE set_key = ?1 AND member = ?2)",
        )
        .bind(set)
        .bind(member)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(found != 0)
    }

    async fn smembers(&self, set: &str) -> StorageResult<Vec<String>> {
        sqlx::query_scalar("SELECT member FROM set_members WHERE set_key = ?1 ORDER BY member")
            .bind(set)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Range scan instead of LIKE: prefixes routinely contain '_' and '%'.
        let keys: Vec<String> = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query_scalar::<_, String>(
                    "SELECT key FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )
                    .bind(prefix)
                    .bind(upper)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar::<_, String>("SELECT key FROM kv WHERE key >= ?1 ORDER BY key")
                    .bind(prefix)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StorageError::Database)?;

        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    async fn sort(&self, query: &SortQuery) -> StorageResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let members: Vec<String> =
            sqlx::query_scalar("SELECT member FROM set_members WHERE set_key = ?1 ORDER BY member")
                .bind(&query.set)
                .fetch_all(&mut *tx)
                .await
                .map_err(StorageError::Database)?;

        let mut rows = Vec::with_capacity(members.len());
        for member in members {
            let weight = match query.weight_key(&member) {
                Some(key) => sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?1")
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(StorageError::Database)?,
                None => None,
            };
            rows.push((member, weight));
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(query.apply(rows)?)
    }

    async fn exec(&self, batch: Batch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        for op in batch.into_ops() {
            let statement = match op {
                BatchOp::Set { key, value } => sqlx::query(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(value),
                BatchOp::Del { key } => sqlx::query("DELETE FROM kv WHERE key = ?1").bind(key),
                BatchOp::SAdd { set, member } => sqlx::query(
                    "INSERT INTO set_members (set_key, member) VALUES (?1, ?2)
                     ON CONFLICT(set_key, member) DO NOTHING",
                )
                .bind(set)
                .bind(member),
                BatchOp::SRem { set, member } => {
                    sqlx::query("DELETE FROM set_members WHERE set_key = ?1 AND member = ?2")
                        .bind(set)
                        .bind(member)
                }
            };
            // An early return drops `tx`, which rolls it back.
            statement
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(())
    }
}
