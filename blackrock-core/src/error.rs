//! Error types for Blackrock

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Blackrock operations
pub type Result<T> = std::result::Result<T, BlackrockError>;

/// Blackrock error types
#[derive(Error, Debug)]
pub enum BlackrockError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope carries no metadata block
    #[error("missing metadata")]
    MissingMetadata,

    /// Envelope has an empty foreign id
    #[error("missing foreign_id")]
    MissingForeignId,

    /// Envelope has an empty foreign type
    #[error("missing foreign_type")]
    MissingForeignType,

    /// Envelope has an empty event type
    #[error("missing event_type")]
    MissingEventType,

    /// Forward record failed magic, header or data verification
    #[error("checksum mismatch at slot {slot}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { slot: u32, expected: u32, actual: u32 },

    /// Read past the end of the forward log
    #[error("end of forward log")]
    Eof,

    /// Query term without a field
    #[error("query term is missing its tag")]
    MissingTag,

    /// `or` queries cannot carry a `not` clause
    #[error("or query cannot have a not clause")]
    OrWithNot,

    /// Query node type is not recognised
    #[error("unknown query type: {0}")]
    UnknownType(String),

    /// Offset sidecar failed verification
    #[error("offset sidecar corrupt: {path:?}")]
    OffsetCorrupt { path: PathBuf },

    /// Forward log would overflow the 31-bit slot counter
    #[error("forward log is full: {path:?}")]
    SegmentFull { path: PathBuf },

    /// Another process already consumes this partition
    #[error("partition lock already held: {path:?}")]
    PartitionLocked { path: PathBuf },

    /// Payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl BlackrockError {
    /// Envelope-level validation failure; the event is dropped and ingestion continues
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BlackrockError::MissingMetadata
                | BlackrockError::MissingForeignId
                | BlackrockError::MissingForeignType
                | BlackrockError::MissingEventType
        )
    }

    /// Query could not be compiled
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            BlackrockError::MissingTag | BlackrockError::OrWithNot | BlackrockError::UnknownType(_)
        )
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BlackrockError::ChecksumMismatch { .. } | BlackrockError::OffsetCorrupt { .. }
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlackrockError::Io(_) | BlackrockError::PartitionLocked { .. })
    }
}

impl From<bincode::Error> for BlackrockError {
    fn from(e: bincode::Error) -> Self {
        BlackrockError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BlackrockError::MissingEventType.is_validation());
        assert!(!BlackrockError::MissingEventType.is_corruption());
        assert!(BlackrockError::OrWithNot.is_query());
        assert!(BlackrockError::ChecksumMismatch { slot: 1, expected: 0, actual: 1 }.is_corruption());
        let io = BlackrockError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(io.is_retryable());
    }
}
