//! Packet - the `{model, options}` envelope used on every wire.
//!
//! The same shape travels client → server (requests), server → client
//! (replies and notifications) and server → broker → server (pub/sub).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Condition, Model, Record, SortSpec, SyncError};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Request options and routing metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Operation name (`create`, `read`, ...) or, outbound, its notification name.
    #[serde(default)]
    pub method: String,
    /// Record type; falls back to `model.type` when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    /// Explicit channel; derived from type and id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Sort-indexed property names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_props: Vec<String>,
    /// External-key property names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_keys: Vec<String>,
    /// Collection sort parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    /// Collection lookup by external key: `{ name: value }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_key: Option<Map<String, Value>>,
    /// Conditions applied to collection read results.
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Skip the broadcast notification.
    #[serde(default, skip_serializing_if = "is_false")]
    pub silent: bool,
    /// Opaque client token echoed in the direct reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

impl Options {
    /// Options carrying just a method name.
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    /// The external-key lookup pair, if one was given.
    pub fn ext_key_pair(&self) -> Option<(&str, &Value)> {
        self.ext_key
            .as_ref()
            .and_then(|m| m.iter().next())
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// Error details attached to a failed request's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind (see [`SyncError::kind`]).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&SyncError> for ErrorBody {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// The envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Affected record, or records for a collection read.
    #[serde(default)]
    pub model: Model,
    /// Options and routing metadata.
    #[serde(default)]
    pub options: Options,
    /// Present only on error replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Packet {
    /// Create a packet around a single record.
    pub fn new(model: Record, options: Options) -> Self {
        Self {
            model: Model::One(model),
            options,
            error: None,
        }
    }

    /// Build the error reply for a request.
    ///
    /// Keeps the request's method, channel and `requestId` so the client
    /// can correlate it.
    pub fn error_reply(request: &Options, err: &SyncError) -> Self {
        Self {
            model: Model::default(),
            options: Options {
                method: request.method.clone(),
                record_type: request.record_type.clone(),
                channel: request.channel.clone(),
                request_id: request.request_id.clone(),
                ..Options::default()
            },
            error: Some(ErrorBody::from(err)),
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::from)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(SyncError::from)
    }
}
