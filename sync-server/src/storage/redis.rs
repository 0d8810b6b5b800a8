//! Redis store backend for chansync-server.
//!
//! Keys map one-to-one onto Redis: bodies and index entries are strings,
//! memberships are sets and counters use INCR. A batch runs inside
//! MULTI/EXEC. Sorting reads a set's members and their weights in one Lua
//! script, so both come from the same point in time.

use super::KvStore;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use sync_core::{Batch, BatchOp, SortQuery, SortTarget};

/// Keys fetched per SCAN round-trip.
const SCAN_COUNT: usize = 500;

/// Returns `member, weight` pairs flattened; a missing weight is nil.
const SORT_ROWS: &str = r#"
local members = redis.call('SMEMBERS', KEYS[1])
local rows = {}
for _, member in ipairs(members) do
    rows[#rows + 1] = member
    if ARGV[1] == '1' then
        local id = member
        if #member > #ARGV[4] and string.sub(member, 1, #ARGV[4]) == ARGV[4] then
            id = string.sub(member, #ARGV[4] + 1)
        end
        rows[#rows + 1] = redis.call('GET', ARGV[2] .. id .. ARGV[3])
    else
        rows[#rows + 1] = false
    end
end
return rows
"#;

/// Redis-based key-value store.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    sort_rows: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            sort_rows: Script::new(SORT_ROWS),
        })
    }
}

/// Escape glob metacharacters so `prefix` matches only itself in SCAN MATCH.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 4);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Pair up the flat `member, weight, ...` reply of the sort script.
fn pair_rows(set: &str, flat: Vec<Option<String>>) -> StorageResult<Vec<(String, Option<String>)>> {
    let mut rows = Vec::with_capacity(flat.len() / 2);
    let mut values = flat.into_iter();
    while let Some(member) = values.next() {
        let member = member.ok_or_else(|| StorageError::Corrupt { key: set.to_string() })?;
        rows.push((member, values.next().flatten()));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(rows)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn incr(&self, key: &str) -> StorageResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn sismember(&self, set: &str, member: &str) -> StorageResult<bool> {
        let mut conn = self.conn.clone();
        let is_member: bool = redis::cmd("SISMEMBER")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(is_member)
    }

    async fn smembers(&self, set: &str) -> StorageResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> = redis::cmd("SMEMBERS").arg(set).query_async(&mut conn).await?;
        members.sort();
        Ok(members)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", glob_escape(prefix));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn sort(&self, query: &SortQuery) -> StorageResult<Vec<String>> {
        let (sorted, head, tail) = match &query.target {
            SortTarget::NoSort => ("0", "", ""),
            SortTarget::Pattern(pattern) => match pattern.split_once('*') {
                Some((head, tail)) => ("1", head, tail),
                None => ("1", pattern.as_str(), ""),
            },
        };
        let mut conn = self.conn.clone();
        let flat: Vec<Option<String>> = self
            .sort_rows
            .key(&query.set)
            .arg(sorted)
            .arg(head)
            .arg(tail)
            .arg(format!("{}:", query.set))
            .invoke_async(&mut conn)
            .await?;
        let rows = pair_rows(&query.set, flat)?;
        Ok(query.apply(rows)?)
    }

    async fn exec(&self, batch: Batch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value } => pipe.cmd("SET").arg(key).arg(value).ignore(),
                BatchOp::Del { key } => pipe.cmd("DEL").arg(key).ignore(),
                BatchOp::SAdd { set, member } => pipe.cmd("SADD").arg(set).arg(member).ignore(),
                BatchOp::SRem { set, member } => pipe.cmd("SREM").arg(set).arg(member).ignore(),
            };
        }

        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Redis URL for live tests; they are skipped when unset.
    fn redis_url() -> Option<String> {
        std::env::var("CHANSYNC_REDIS_URL").ok()
    }

    /// A type name no other test run uses.
    fn unique_type() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("todo{}x{}", std::process::id(), nanos)
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(glob_escape("todo::owner:a::"), "todo::owner:a::");
        assert_eq!(glob_escape("t*d?[x]\\"), "t\\*d\\?\\[x\\]\\\\");
    }

    #[test]
    fn sort_rows_pair_up_in_member_order() {
        let rows = pair_rows(
            "todo",
            vec![
                Some("todo:2".into()),
                None,
                Some("todo:1".into()),
                Some("5".into()),
            ],
        )
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("todo:1".to_string(), Some("5".to_string())),
                ("todo:2".to_string(), None),
            ]
        );

        let err = pair_rows("todo", vec![None, None]).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn connect_rejects_bad_url() {
        let err = RedisStore::connect("not a url").await.unwrap_err();
        assert!(matches!(err, StorageError::Redis(_)));
    }

    #[tokio::test]
    async fn live_batch_sort_and_prefix_scan() {
        let Some(url) = redis_url() else { return };
        let store = RedisStore::connect(&url).await.unwrap();
        let ty = unique_type();

        assert_eq!(store.incr(&format!("next.{ty}.id")).await.unwrap(), 1);

        let mut batch = Batch::new();
        for (id, rank) in [("1", "30"), ("2", "10"), ("3", "20")] {
            batch
                .set(format!("{ty}:{id}"), format!("{{\"id\":{id}}}"))
                .set(format!("{ty}::rank::{id}"), rank)
                .set(format!("{ty}::owner:a*::{id}"), "a*")
                .sadd(ty.as_str(), format!("{ty}:{id}"));
        }
        store.exec(batch).await.unwrap();

        assert!(store.sismember(&ty, &format!("{ty}:2")).await.unwrap());
        assert_eq!(store.smembers(&ty).await.unwrap().len(), 3);

        let mut query = SortQuery::by_property(&ty, "rank");
        query.desc = true;
        let ordered = store.sort(&query).await.unwrap();
        assert_eq!(ordered, vec![format!("{ty}:1"), format!("{ty}:3"), format!("{ty}:2")]);

        let owned = store
            .keys_with_prefix(&format!("{ty}::owner:a*::"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 3);
        assert!(store
            .keys_with_prefix(&format!("{ty}::owner:ab::"))
            .await
            .unwrap()
            .is_empty());

        let mut cleanup = Batch::new();
        for id in ["1", "2", "3"] {
            cleanup
                .srem(ty.as_str(), format!("{ty}:{id}"))
                .del(format!("{ty}:{id}"))
                .del(format!("{ty}::rank::{id}"))
                .del(format!("{ty}::owner:a*::{id}"));
        }
        cleanup.del(format!("next.{ty}.id"));
        store.exec(cleanup).await.unwrap();
        assert!(store.smembers(&ty).await.unwrap().is_empty());
        assert_eq!(store.get(&format!("{ty}:1")).await.unwrap(), None);
    }
}
