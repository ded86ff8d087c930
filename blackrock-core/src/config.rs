//! Index configuration

use crate::{BlackrockError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Segment bucket width in seconds (hourly)
pub const SEGMENT_STEP: i64 = 3600;

/// Open postings descriptors kept per segment in eager mode
pub const FD_CACHE_SIZE: usize = 256;

/// Buffered postings flush threshold (8MB)
pub const BUFFERED_FLUSH_BYTES: usize = 8 * 1024 * 1024;

/// How postings reach disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingsMode {
    /// Write-through on every append, descriptors held in an LRU
    #[default]
    Eager,
    /// Accumulate per-file bytes in memory, flush in bulk
    Buffered,
}

impl std::str::FromStr for PostingsMode {
    type Err = BlackrockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "eager" => Ok(PostingsMode::Eager),
            "buffered" => Ok(PostingsMode::Buffered),
            other => Err(BlackrockError::Config(format!("unknown postings mode: {}", other))),
        }
    }
}

/// Search index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Data root; segments live under `<data_dir>/<segment_step>/`
    pub data_dir: PathBuf,
    /// Seconds per segment bucket
    pub segment_step: i64,
    /// Search keys indexed at ingest; empty indexes every key
    pub whitelist: Vec<String>,
    /// Forward payload LRU capacity per segment, 0 disables it
    pub forward_cache_size: usize,
    /// Open postings descriptors per segment (eager mode)
    pub fd_cache_size: usize,
    pub postings_mode: PostingsMode,
    /// Pending bytes that trigger a flush in buffered mode
    pub buffered_flush_bytes: usize,
    /// fsync the forward log when a segment closes
    pub sync_on_close: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            segment_step: SEGMENT_STEP,
            whitelist: Vec::new(),
            forward_cache_size: 0,
            fd_cache_size: FD_CACHE_SIZE,
            postings_mode: PostingsMode::default(),
            buffered_flush_bytes: BUFFERED_FLUSH_BYTES,
            sync_on_close: true,
        }
    }
}

impl IndexConfig {
    /// Config rooted at `data_dir` with every other knob at its default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Directory holding segments and partition sidecars
    pub fn index_root(&self) -> PathBuf {
        self.data_dir.join(self.segment_step.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_step <= 0 {
            return Err(BlackrockError::Config(format!(
                "segment_step must be positive, got {}",
                self.segment_step
            )));
        }
        if self.fd_cache_size == 0 {
            return Err(BlackrockError::Config("fd_cache_size must be non-zero".into()));
        }
        Ok(())
    }
}
