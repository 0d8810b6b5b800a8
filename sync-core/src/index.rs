//! Index manager: secondary-index writes for create, update and delete.
//!
//! Nothing here touches a store. Every function appends ops to a
//! [`Batch`] that the caller commits together with the record body, so
//! index entries and bodies become visible atomically.
//!
//! Encoding rule for indexed values: `true` → `1`, `false` → `0` (stores
//! have no boolean sort), numbers and non-empty strings verbatim. Null,
//! empty strings, objects and missing fields produce no entry.

use std::collections::BTreeSet;

use chansync_types::{Record, DATE_CREATED, DATE_MODIFIED};
use serde_json::Value;

use crate::keys::{external_key, sort_key};
use crate::Batch;

/// Sort indexes every record carries regardless of declared properties.
pub const BUILTIN_SORT_PROPS: [&str; 2] = [DATE_CREATED, DATE_MODIFIED];

/// Encode a scalar for use as a sort weight or external-key value.
pub fn encode_index_value(value: &Value) -> Option<String> {
    match value {
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Declared sort properties plus the built-in date indexes, deduplicated,
/// declared order first.
pub fn sort_properties(declared: &[String]) -> Vec<String> {
    let mut props: Vec<String> = Vec::with_capacity(declared.len() + BUILTIN_SORT_PROPS.len());
    for prop in declared
        .iter()
        .map(String::as_str)
        .chain(BUILTIN_SORT_PROPS)
    {
        if !prop.is_empty() && !props.iter().any(|p| p == prop) {
            props.push(prop.to_string());
        }
    }
    props
}

fn sort_value(record: &Record, property: &str) -> Option<String> {
    record.get(property).and_then(encode_index_value)
}

/// The set of encoded values an external-key property holds.
///
/// Arrays contribute one value per encodable element.
pub fn external_values(record: &Record, name: &str) -> BTreeSet<String> {
    match record.get(name) {
        Some(Value::Array(items)) => items.iter().filter_map(encode_index_value).collect(),
        Some(value) => encode_index_value(value).into_iter().collect(),
        None => BTreeSet::new(),
    }
}

/// Write `sort_key(type, prop) + id -> value` for every property with a value.
pub fn set_sort_indexes(record: &Record, record_type: &str, properties: &[String], batch: &mut Batch) {
    let Some(id) = record.id() else { return };
    for prop in properties {
        if let Some(value) = sort_value(record, prop) {
            batch.set(format!("{}{}", sort_key(record_type, prop), id), value);
        }
    }
}

/// Delete the sort-index entries of every property.
pub fn unset_sort_indexes(record: &Record, record_type: &str, properties: &[String], batch: &mut Batch) {
    let Some(id) = record.id() else { return };
    for prop in properties {
        batch.del(format!("{}{}", sort_key(record_type, prop), id));
    }
}

/// Rewrite only the sort entries whose encoded value changed.
///
/// A property that lost its value has its entry deleted.
pub fn diff_sort_indexes(
    record: &Record,
    previous: &Record,
    record_type: &str,
    properties: &[String],
    batch: &mut Batch,
) {
    let Some(id) = record.id() else { return };
    for prop in properties {
        let new = sort_value(record, prop);
        if new == sort_value(previous, prop) {
            continue;
        }
        let key = format!("{}{}", sort_key(record_type, prop), id);
        match new {
            Some(value) => batch.set(key, value),
            None => batch.del(key),
        };
    }
}

/// Write external-key entries for values not already present on `previous`.
///
/// With no previous record (a create) every value is written.
pub fn set_external_keys(
    record: &Record,
    previous: Option<&Record>,
    record_type: &str,
    names: &[String],
    batch: &mut Batch,
) {
    let Some(id) = record.id() else { return };
    for name in names {
        let old = previous
            .map(|p| external_values(p, name))
            .unwrap_or_default();
        for value in external_values(record, name).difference(&old) {
            batch.set(
                format!("{}{}", external_key(record_type, name, value), id),
                value.clone(),
            );
        }
    }
}

/// Delete external-key entries present on `previous` but absent on `record`.
///
/// With no new record (a delete) every entry of `previous` is removed.
pub fn unset_external_keys(
    previous: &Record,
    record: Option<&Record>,
    record_type: &str,
    names: &[String],
    batch: &mut Batch,
) {
    let Some(id) = previous.id() else { return };
    for name in names {
        let current = record.map(|r| external_values(r, name)).unwrap_or_default();
        for value in external_values(previous, name).difference(&current) {
            batch.del(format!("{}{}", external_key(record_type, name, value), id));
        }
    }
}
