//! # sync-types
//!
//! Wire format types for the chansync record synchronization protocol.
//!
//! This crate provides the foundational types used across all chansync crates:
//! - [`Record`], [`Model`] - Plain records exchanged with clients
//! - [`Packet`], [`Options`] - The `{model, options}` request/notification envelope
//! - [`Method`] - Operation kinds and their notification names
//! - [`SortSpec`], [`Condition`] - Collection query parameters
//! - [`ConnectionId`] - Process-local connection identity
//! - [`SyncError`] - Request-scoped error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
mod envelope;
mod error;
mod ids;
mod method;
mod query;
mod record;

pub use envelope::{ErrorBody, Options, Packet};
pub use error::SyncError;
pub use ids::ConnectionId;
pub use method::Method;
pub use query::{CompareOp, Condition, SortDir, SortSpec};
pub use record::{Model, Record, DATE_CREATED, DATE_MODIFIED, FIELD_ID, FIELD_TYPE};
