//! Record engine: create, read, update and delete against the store.
//!
//! Every write is a single [`Batch`] holding the body, its index entries
//! and its membership change, executed atomically. After a successful
//! write the engine publishes a notification unless the request was
//! `silent`. Every store round-trip is bounded by the configured timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use sync_core::index::{self, encode_index_value, sort_properties, BUILTIN_SORT_PROPS};
use sync_core::keys::{
    counter_key, external_key, id_from_index_key, is_valid_id, is_valid_property, is_valid_type,
    record_key,
};
use sync_core::{matches_all, Batch, RangeLimit, SortQuery};
use sync_types::channel::derive_channel;
use sync_types::{
    Method, Model, Options, Packet, Record, SortDir, SyncError, DATE_CREATED, DATE_MODIFIED,
    FIELD_ID,
};

use crate::bridge::PubSubBridge;
use crate::schema::SchemaRegistry;
use crate::storage::KvStore;

/// Index declarations for one request: schema plus request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IndexPlan {
    /// Declared sort properties (built-in dates not included).
    sort_props: Vec<String>,
    ext_keys: Vec<String>,
    text_props: Vec<String>,
}

fn merge(declared: &[String], requested: &[String]) -> Result<Vec<String>, SyncError> {
    let mut merged: Vec<String> = Vec::with_capacity(declared.len() + requested.len());
    for prop in declared.iter().chain(requested) {
        if prop.is_empty() || merged.contains(prop) {
            continue;
        }
        if !is_valid_property(prop) {
            return Err(SyncError::InvalidPacket(format!(
                "property name {prop:?} must not contain ':'"
            )));
        }
        merged.push(prop.clone());
    }
    Ok(merged)
}

/// The record type of a request: `options.type`, else `model.type`.
///
/// Types that could alias another key (see [`is_valid_type`]) are rejected.
pub fn resolve_type(record: &Record, options: &Options) -> Result<String, SyncError> {
    let record_type = options
        .record_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| record.record_type())
        .ok_or(SyncError::MissingType)?;
    if !is_valid_type(record_type) {
        return Err(SyncError::InvalidPacket(format!(
            "type {record_type:?} must not contain ':' or whitespace"
        )));
    }
    Ok(record_type.to_string())
}

/// The client-supplied id of a request, if any, checked for key safety.
fn checked_id(record: &Record) -> Result<Option<String>, SyncError> {
    match record.id() {
        Some(id) if !is_valid_id(&id) => Err(SyncError::InvalidPacket(format!(
            "id {id:?} must not contain ':'"
        ))),
        id => Ok(id),
    }
}

/// The channel of a request: `options.channel`, else derived from type and id.
pub fn resolve_channel(record_type: &str, record: &Record, options: &Options) -> String {
    match options.channel.as_deref().filter(|c| !c.is_empty()) {
        Some(channel) => channel.to_string(),
        None => derive_channel(record_type, record.id().as_deref()),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn parse_body(key: &str, body: &str) -> Result<Record, SyncError> {
    Record::from_json(body)
        .map_err(|e| SyncError::Store(format!("corrupt record at {key}: {e}")))
}

/// Executes record operations.
pub struct Engine {
    store: Arc<dyn KvStore>,
    bridge: Arc<PubSubBridge>,
    schemas: Arc<SchemaRegistry>,
    timeout: Duration,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("schemas", &self.schemas)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine.
    pub fn new(
        store: Arc<dyn KvStore>,
        bridge: Arc<PubSubBridge>,
        schemas: Arc<SchemaRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            bridge,
            schemas,
            timeout,
        }
    }

    fn plan(&self, record_type: &str, options: &Options) -> Result<IndexPlan, SyncError> {
        let plan = match self.schemas.get(record_type) {
            Some(schema) => IndexPlan {
                sort_props: merge(schema.index_props(), &options.index_props)?,
                ext_keys: merge(schema.ext_keys(), &options.ext_keys)?,
                text_props: options
                    .sort
                    .as_ref()
                    .and_then(|s| s.by.clone())
                    .filter(|by| schema.is_text(by))
                    .into_iter()
                    .collect(),
            },
            None => IndexPlan {
                sort_props: merge(&[], &options.index_props)?,
                ext_keys: merge(&[], &options.ext_keys)?,
                text_props: Vec::new(),
            },
        };
        Ok(plan)
    }

    /// Await a store future, failing with [`SyncError::Timeout`] past the bound.
    async fn bounded<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> Result<T, SyncError>
    where
        E: Into<SyncError>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                tracing::warn!("Store round-trip exceeded {:?}", self.timeout);
                Err(SyncError::Timeout)
            }
        }
    }

    /// Create a record: assign the next id, stamp dates, write body,
    /// indexes and membership in one batch.
    pub async fn create(&self, mut record: Record, options: &Options) -> Result<Record, SyncError> {
        let record_type = resolve_type(&record, options)?;
        let plan = self.plan(&record_type, options)?;

        let next = self.bounded(self.store.incr(&counter_key(&record_type))).await?;
        let id = u64::try_from(next)
            .map_err(|_| SyncError::Store(format!("counter for {record_type} is negative")))?;

        let now = now_millis();
        record.set_id(id);
        record.set_type(&record_type);
        record.insert(DATE_CREATED, now);
        record.insert(DATE_MODIFIED, now);

        let key = record_key(&record_type, &id.to_string());
        let mut batch = Batch::new();
        batch.set(&key, record.to_json());
        index::set_sort_indexes(&record, &record_type, &sort_properties(&plan.sort_props), &mut batch);
        index::set_external_keys(&record, None, &record_type, &plan.ext_keys, &mut batch);
        batch.sadd(&record_type, &key);

        self.bounded(self.store.exec(batch)).await?;
        tracing::debug!("Created {}", key);

        self.notify(Method::Create, &record_type, &record, options).await?;
        Ok(record)
    }

    /// Read one record by id, or a collection by external key or sort.
    pub async fn read(&self, record: &Record, options: &Options) -> Result<Model, SyncError> {
        let record_type = resolve_type(record, options)?;

        if let Some(id) = checked_id(record)? {
            let key = record_key(&record_type, &id);
            let body = self
                .bounded(self.store.get(&key))
                .await?
                .ok_or(SyncError::NotFound { key: key.clone() })?;
            return Ok(Model::One(parse_body(&key, &body)?));
        }

        let plan = self.plan(&record_type, options)?;
        let limit = options
            .sort
            .as_ref()
            .and_then(|s| s.limit.as_deref())
            .map(RangeLimit::parse)
            .transpose()
            .map_err(|e| SyncError::InvalidPacket(e.to_string()))?;

        let records = match options.ext_key_pair() {
            Some((name, value)) => {
                let records = self.read_by_external_key(&record_type, name, value).await?;
                self.filter_and_page(records, &options.conditions, limit)
            }
            None => {
                let mut query = self.sort_query(&record_type, options, &plan);
                // Conditions drop records, so page only after filtering.
                let deferred = if options.conditions.is_empty() {
                    query.limit = limit;
                    None
                } else {
                    limit
                };
                let keys = self.bounded(self.store.sort(&query)).await?;
                let records = self.fetch(&keys).await?;
                self.filter_and_page(records, &options.conditions, deferred)
            }
        };

        tracing::debug!("Read {} {} records", records.len(), record_type);
        Ok(Model::Many(records))
    }

    fn sort_query(&self, record_type: &str, options: &Options, plan: &IndexPlan) -> SortQuery {
        let spec = options.sort.clone().unwrap_or_default();
        let by = spec.by.as_deref().filter(|b| !b.is_empty());
        let mut query = match by {
            Some(prop) => SortQuery::by_property(record_type, prop),
            None => SortQuery::unsorted(record_type),
        };
        query.desc = spec.dir == SortDir::Desc;
        query.alpha = spec
            .alpha
            .unwrap_or_else(|| by.is_some_and(|prop| plan.text_props.iter().any(|p| p == prop)));
        query
    }

    async fn read_by_external_key(
        &self,
        record_type: &str,
        name: &str,
        value: &Value,
    ) -> Result<Vec<Record>, SyncError> {
        let encoded = encode_index_value(value).ok_or_else(|| {
            SyncError::InvalidPacket(format!("extKey {name} must be a non-empty scalar"))
        })?;
        let prefix = external_key(record_type, name, &encoded);
        let entries = self.bounded(self.store.keys_with_prefix(&prefix)).await?;
        let keys: Vec<String> = entries
            .iter()
            .filter_map(|entry| id_from_index_key(&prefix, entry))
            .map(|id| record_key(record_type, id))
            .collect();
        self.fetch(&keys).await
    }

    /// Load bodies for `keys`, skipping any that vanished.
    async fn fetch(&self, keys: &[String]) -> Result<Vec<Record>, SyncError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let bodies = self.bounded(self.store.mget(keys)).await?;
        keys.iter()
            .zip(bodies)
            .filter_map(|(key, body)| body.map(|b| parse_body(key, &b)))
            .collect()
    }

    fn filter_and_page(
        &self,
        records: Vec<Record>,
        conditions: &[sync_types::Condition],
        limit: Option<RangeLimit>,
    ) -> Vec<Record> {
        let records: Vec<Record> = records
            .into_iter()
            .filter(|r| matches_all(conditions, r))
            .collect();
        match limit {
            Some(limit) => limit.apply(records),
            None => records,
        }
    }

    /// Replace a record's body, keeping its id, type and creation date,
    /// and rewrite only the index entries whose values changed.
    pub async fn update(&self, mut record: Record, options: &Options) -> Result<Record, SyncError> {
        let record_type = resolve_type(&record, options)?;
        let id = checked_id(&record)?.ok_or(SyncError::MissingId)?;
        let plan = self.plan(&record_type, options)?;

        let key = record_key(&record_type, &id);
        let body = self
            .bounded(self.store.get(&key))
            .await?
            .ok_or(SyncError::NotFound { key: key.clone() })?;
        let previous = parse_body(&key, &body)?;

        if let Some(stored_id) = previous.get(FIELD_ID) {
            record.insert(FIELD_ID, stored_id.clone());
        }
        record.set_type(&record_type);
        match previous.get(DATE_CREATED) {
            Some(created) => record.insert(DATE_CREATED, created.clone()),
            None => record.remove(DATE_CREATED),
        };
        record.insert(DATE_MODIFIED, now_millis());

        let declared: Vec<String> = plan
            .sort_props
            .iter()
            .filter(|p| !BUILTIN_SORT_PROPS.contains(&p.as_str()))
            .cloned()
            .collect();

        let mut batch = Batch::new();
        batch.set(&key, record.to_json());
        index::diff_sort_indexes(&record, &previous, &record_type, &declared, &mut batch);
        index::set_sort_indexes(&record, &record_type, &[DATE_MODIFIED.to_string()], &mut batch);
        index::unset_external_keys(&previous, Some(&record), &record_type, &plan.ext_keys, &mut batch);
        index::set_external_keys(&record, Some(&previous), &record_type, &plan.ext_keys, &mut batch);

        self.bounded(self.store.exec(batch)).await?;
        tracing::debug!("Updated {}", key);

        self.notify(Method::Update, &record_type, &record, options).await?;
        Ok(record)
    }

    /// Remove a record, its membership and all of its index entries.
    ///
    /// The notification carries the record as it was stored before the
    /// delete. Deleting a missing record succeeds and removes nothing.
    pub async fn delete(&self, record: Record, options: &Options) -> Result<Record, SyncError> {
        let record_type = resolve_type(&record, options)?;
        let id = checked_id(&record)?.ok_or(SyncError::MissingId)?;
        let plan = self.plan(&record_type, options)?;

        let key = record_key(&record_type, &id);
        let is_member = self.bounded(self.store.sismember(&record_type, &key)).await?;
        let stored = self.bounded(self.store.get(&key)).await?;

        let mut snapshot = match stored {
            Some(body) => parse_body(&key, &body)?,
            None => record,
        };
        snapshot.set_type(&record_type);
        if snapshot.id().is_none() {
            snapshot.insert(FIELD_ID, id.clone());
        }

        let mut batch = Batch::new();
        if is_member {
            batch.srem(&record_type, &key);
        }
        batch.del(&key);
        index::unset_sort_indexes(&snapshot, &record_type, &sort_properties(&plan.sort_props), &mut batch);
        index::unset_external_keys(&snapshot, None, &record_type, &plan.ext_keys, &mut batch);

        self.bounded(self.store.exec(batch)).await?;
        tracing::debug!("Deleted {}", key);

        self.notify(Method::Delete, &record_type, &snapshot, options).await?;
        Ok(snapshot)
    }

    /// Publish a record without touching the store.
    pub async fn publish(&self, record: Record, options: &Options) -> Result<Record, SyncError> {
        let record_type = resolve_type(&record, options)?;
        let channel = resolve_channel(&record_type, &record, options);
        let packet = Packet::new(
            record.clone(),
            Options {
                method: Method::Publish.notification_name().to_string(),
                record_type: Some(record_type.clone()),
                channel: Some(channel.clone()),
                ..Options::default()
            },
        );
        self.bounded(self.bridge.publish(&channel, &record_type, &packet))
            .await?;
        Ok(record)
    }

    async fn notify(
        &self,
        method: Method,
        record_type: &str,
        record: &Record,
        options: &Options,
    ) -> Result<(), SyncError> {
        if options.silent {
            return Ok(());
        }
        let channel = resolve_channel(record_type, record, options);
        let packet = Packet::new(
            record.clone(),
            Options {
                method: method.notification_name().to_string(),
                record_type: Some(record_type.to_string()),
                channel: Some(channel.clone()),
                ..Options::default()
            },
        );
        self.bounded(self.bridge.publish(&channel, record_type, &packet))
            .await?;
        Ok(())
    }
}
