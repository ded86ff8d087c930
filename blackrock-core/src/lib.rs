//! Blackrock Core - Time-Partitioned Event Store
//!
//! An append-only store for structured events, bucketed by creation time and
//! searchable through boolean queries over exact `(field, value)` terms.
//!
//! # Architecture
//!
//! Every time bucket is a [`segment::Segment`] with two on-disk stores:
//!
//! - **Forward log**: slot-padded, checksummed records holding the encoded envelope
//! - **Inverted store**: one flat file of packed `(doc_id, second)` postings per term
//! - **Segment manager**: [`SearchIndex`] opens segments lazily and routes ingest and queries
//! - **Stream adapter**: per-partition consumers with offset checkpoints and exclusive locks
//!
//! Field and value names are sanitized and truncated to 64 bytes before they
//! become paths, so two long values sharing a 64-byte sanitized prefix share a
//! postings file and cannot be told apart on retrieval.

pub mod config;
pub mod consumer;
pub mod dictionary;
pub mod forward;
pub mod index;
pub mod inverted;
pub mod prepare;
pub mod query;
pub mod search;
pub mod segment;
pub mod sidecar;

mod error;
mod types;

pub use config::{IndexConfig, PostingsMode};
pub use error::{BlackrockError, Result};
pub use index::{IndexStats, SearchIndex};
pub use query::Query;
pub use search::{AggregateRequest, Aggregation, Hit, SearchResult};
pub use types::*;

/// Blackrock version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
