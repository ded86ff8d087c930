//! Core types for Blackrock

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in nanoseconds since Unix epoch
pub type Timestamp = i64;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A single key/value pair attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Searchable description of an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Global id assigned by the stream adapter: `partition << 56 | offset`
    #[serde(default)]
    pub id: u64,
    /// Nanoseconds since epoch; 0 means "assign now"
    #[serde(default)]
    pub created_at_ns: Timestamp,
    pub event_type: String,
    pub foreign_type: String,
    pub foreign_id: String,
    /// Indexed fields
    #[serde(default)]
    pub search: Vec<KeyValue>,
    /// Stored, not indexed; counted by aggregations
    #[serde(default)]
    pub count: Vec<KeyValue>,
    /// Stored, not indexed
    #[serde(default)]
    pub properties: Vec<KeyValue>,
}

impl Metadata {
    /// Create metadata for an event about `foreign_type:foreign_id`
    pub fn new(
        event_type: impl Into<String>,
        foreign_type: impl Into<String>,
        foreign_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            foreign_type: foreign_type.into(),
            foreign_id: foreign_id.into(),
            ..Default::default()
        }
    }

    pub fn with_created_at(mut self, created_at_ns: Timestamp) -> Self {
        self.created_at_ns = created_at_ns;
        self
    }

    pub fn with_search(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search.push(KeyValue::new(key, value));
        self
    }

    pub fn with_count(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.count.push(KeyValue::new(key, value));
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(KeyValue::new(key, value));
        self
    }

    /// Creation time in whole seconds
    pub fn created_at_sec(&self) -> i64 {
        self.created_at_ns.div_euclid(NANOS_PER_SEC)
    }
}

/// A submitted event: searchable metadata plus an opaque payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata: Some(metadata),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serialize for the forward log or the message stream
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode an envelope previously produced by [`Envelope::encode`]
    pub fn decode(data: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Address of a document: its segment bucket and its slot within that segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocRef {
    pub segment: i64,
    pub doc_id: u32,
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment, self.doc_id)
    }
}

/// Inclusive time window in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from_sec: i64,
    pub to_sec: i64,
}

impl TimeWindow {
    pub fn new(from_sec: i64, to_sec: i64) -> Self {
        Self { from_sec, to_sec }
    }

    /// Resolve optional bounds: `to` defaults to now, `from` to `to - 24h`
    pub fn resolve(from_sec: Option<i64>, to_sec: Option<i64>) -> Self {
        let to_sec = to_sec.unwrap_or_else(|| chrono::Utc::now().timestamp());
        let from_sec = from_sec.unwrap_or(to_sec - 24 * 3600);
        Self { from_sec, to_sec }
    }

    /// Check if a second is inside the window
    pub fn contains(&self, second: i64) -> bool {
        second >= self.from_sec && second <= self.to_sec
    }
}
