//! # sync-core
//!
//! Pure logic for chansync (no I/O, instant tests).
//!
//! This crate computes *what* has to be written to the key-value store for
//! every record operation, without talking to a store:
//! - [`keys`] derives record, sort-index and external-key index keys
//! - [`index`] appends index writes and deletes to a [`Batch`]
//! - [`batch`] models the atomic multi-command unit handed to a store
//! - [`query`] evaluates sort-by-pattern requests and `start-count` ranges
//! - [`filter`] evaluates `where` conditions with a closed operator set
//!
//! The server crate owns the store and executes the batches these modules
//! produce, so the indexing invariants can be tested here in isolation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod filter;
pub mod index;
pub mod keys;
pub mod query;

pub use batch::{Batch, BatchOp};
pub use filter::matches_all;
pub use query::{RangeLimit, SortError, SortQuery, SortTarget};
