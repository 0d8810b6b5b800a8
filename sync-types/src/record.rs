//! Plain records exchanged between clients and the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the engine-assigned record id.
pub const FIELD_ID: &str = "id";
/// Field holding the record's logical kind.
pub const FIELD_TYPE: &str = "type";
/// Creation timestamp (milliseconds since the Unix epoch).
pub const DATE_CREATED: &str = "dateCreated";
/// Last modification timestamp (milliseconds since the Unix epoch).
pub const DATE_MODIFIED: &str = "dateModified";

/// A mapping from field name to value.
///
/// Records are opaque to the engine apart from `id`, `type` and the two
/// date stamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// The record id rendered as a string.
    ///
    /// Numeric ids and non-empty string ids are accepted; anything else
    /// counts as "no id".
    pub fn id(&self) -> Option<String> {
        match self.0.get(FIELD_ID) {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Assign a numeric id.
    pub fn set_id(&mut self, id: u64) {
        self.0.insert(FIELD_ID.to_string(), Value::from(id));
    }

    /// The record's `type` field, if present and non-empty.
    pub fn record_type(&self) -> Option<&str> {
        match self.0.get(FIELD_TYPE) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Set the record's `type` field.
    pub fn set_type(&mut self, record_type: &str) {
        self.0
            .insert(FIELD_TYPE.to_string(), Value::from(record_type));
    }

    /// Look up a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Whether the record has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a JSON string (the stored body format).
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Parse a stored JSON body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

/// The `model` half of a packet: one record, or a collection read result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Model {
    /// Result of a collection read.
    Many(Vec<Record>),
    /// A single record.
    One(Record),
}

impl Default for Model {
    fn default() -> Self {
        Model::One(Record::new())
    }
}

impl Model {
    /// The single record, if this is not a collection.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Model::One(record) => Some(record),
            Model::Many(_) => None,
        }
    }

    /// Take the single record out, treating a collection as empty input.
    pub fn into_record(self) -> Record {
        match self {
            Model::One(record) => record,
            Model::Many(_) => Record::new(),
        }
    }
}

impl From<Record> for Model {
    fn from(record: Record) -> Self {
        Model::One(record)
    }
}

impl From<Vec<Record>> for Model {
    fn from(records: Vec<Record>) -> Self {
        Model::Many(records)
    }
}
