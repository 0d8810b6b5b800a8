//! In-memory store backend.
//!
//! The default backend for single-process deployments and the store every
//! engine test runs against. Failure hooks let tests break a batch midway
//! or slow the store down.

use super::KvStore;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use sync_core::{Batch, BatchOp, SortQuery};

#[derive(Debug, Default)]
struct State {
    strings: BTreeMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    counters: HashMap<String, i64>,
}

impl State {
    /// Apply one op and return what undoes it.
    fn apply(&mut self, op: BatchOp) -> Undo {
        match op {
            BatchOp::Set { key, value } => {
                let previous = self.strings.insert(key.clone(), value);
                Undo::Restore { key, previous }
            }
            BatchOp::Del { key } => {
                let previous = self.strings.remove(&key);
                Undo::Restore { key, previous }
            }
            BatchOp::SAdd { set, member } => {
                let added = self.sets.entry(set.clone()).or_default().insert(member.clone());
                Undo::Membership {
                    set,
                    member,
                    was_member: !added,
                }
            }
            BatchOp::SRem { set, member } => {
                let removed = self
                    .sets
                    .get_mut(&set)
                    .map(|members| members.remove(&member))
                    .unwrap_or(false);
                self.drop_if_empty(&set);
                Undo::Membership {
                    set,
                    member,
                    was_member: removed,
                }
            }
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Restore { key, previous } => match previous {
                Some(value) => {
                    self.strings.insert(key, value);
                }
                None => {
                    self.strings.remove(&key);
                }
            },
            Undo::Membership {
                set,
                member,
                was_member,
            } => {
                if was_member {
                    self.sets.entry(set).or_default().insert(member);
                } else {
                    if let Some(members) = self.sets.get_mut(&set) {
                        members.remove(&member);
                    }
                    self.drop_if_empty(&set);
                }
            }
        }
    }

    fn drop_if_empty(&mut self, set: &str) {
        if self.sets.get(set).is_some_and(BTreeSet::is_empty) {
            self.sets.remove(set);
        }
    }
}

enum Undo {
    Restore {
        key: String,
        previous: Option<String>,
    },
    Membership {
        set: String,
        member: String,
        was_member: bool,
    },
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_exec: Option<String>,
    fail_exec_at: Option<usize>,
    latency: Option<Duration>,
}

/// Process-local key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`KvStore::exec`] fail before applying anything.
    pub fn fail_next_exec(&self, reason: impl Into<String>) {
        self.faults().fail_next_exec = Some(reason.into());
    }

    /// Make the next [`KvStore::exec`] fail after applying `ops` of its ops.
    ///
    /// The partial writes are rolled back before the error is returned.
    pub fn fail_exec_at(&self, ops: usize) {
        self.faults().fail_exec_at = Some(ops);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.faults().latency = Some(latency);
    }

    /// Every string key currently stored, in order.
    pub fn string_keys(&self) -> Vec<String> {
        self.state().strings.keys().cloned().collect()
    }

    /// Number of members in `set`.
    pub fn set_len(&self, set: &str) -> usize {
        self.state().sets.get(set).map_or(0, BTreeSet::len)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = self.faults().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.simulate_latency().await;
        Ok(self.state().strings.get(key).cloned())
    }

    async fn mget(&self, keys: &[String]) -> StorageResult<Vec<Option<String>>> {
        self.simulate_latency().await;
        let state = self.state();
        Ok(keys.iter().map(|k| state.strings.get(k).cloned()).collect())
    }

    async fn incr(&self, key: &str) -> StorageResult<i64> {
        self.simulate_latency().await;
        let mut state = self.state();
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn sismember(&self, set: &str, member: &str) -> StorageResult<bool> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .sets
            .get(set)
            .is_some_and(|members| members.contains(member)))
    }

    async fn smembers(&self, set: &str) -> StorageResult<Vec<String>> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.simulate_latency().await;
        let state = self.state();
        Ok(state
            .strings
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn sort(&self, query: &SortQuery) -> StorageResult<Vec<String>> {
        self.simulate_latency().await;
        let rows: Vec<(String, Option<String>)> = {
            let state = self.state();
            let Some(members) = state.sets.get(&query.set) else {
                return Ok(Vec::new());
            };
            members
                .iter()
                .map(|member| {
                    let weight = query
                        .weight_key(member)
                        .and_then(|key| state.strings.get(&key).cloned());
                    (member.clone(), weight)
                })
                .collect()
        };
        Ok(query.apply(rows)?)
    }

    async fn exec(&self, batch: Batch) -> StorageResult<()> {
        self.simulate_latency().await;
        let (fail_now, fail_at) = {
            let mut faults = self.faults();
            (faults.fail_next_exec.take(), faults.fail_exec_at.take())
        };
        if let Some(reason) = fail_now {
            return Err(StorageError::Injected(reason));
        }

        let mut state = self.state();
        let mut undo = Vec::with_capacity(batch.len());
        for (index, op) in batch.into_ops().into_iter().enumerate() {
            if fail_at == Some(index) {
                for step in undo.into_iter().rev() {
                    state.revert(step);
                }
                return Err(StorageError::Injected(format!("exec aborted at op {index}")));
            }
            undo.push(state.apply(op));
        }
        Ok(())
    }
}
