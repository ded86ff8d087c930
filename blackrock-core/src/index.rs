//! Segment manager - routes ingest and queries to time-bucketed segments

use crate::config::IndexConfig;
use crate::prepare::prepare;
use crate::query::{run_segment, Query};
use crate::segment::Segment;
use crate::{DocRef, Envelope, Result, TimeWindow, Timestamp, NANOS_PER_SEC};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Time-partitioned event index
///
/// Segments are opened lazily and kept open until [`SearchIndex::close`].
pub struct SearchIndex {
    config: IndexConfig,
    root: PathBuf,
    segments: RwLock<HashMap<i64, Arc<Segment>>>,
}

impl SearchIndex {
    /// Open the index rooted at `<data_dir>/<segment_step>`
    pub fn open(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let root = config.index_root();
        std::fs::create_dir_all(&root)?;

        info!("Opened index at {:?} (segment step {}s)", root, config.segment_step);

        Ok(Self {
            config,
            root,
            segments: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bucket id holding a nanosecond timestamp
    pub fn to_segment_id(&self, ns: Timestamp) -> i64 {
        ns.div_euclid(NANOS_PER_SEC)
            .div_euclid(self.config.segment_step)
    }

    fn bucket_of_sec(&self, second: i64) -> i64 {
        second.div_euclid(self.config.segment_step)
    }

    /// Prepare an envelope and index it in the segment for its timestamp
    pub fn ingest(&self, mut envelope: Envelope) -> Result<DocRef> {
        prepare(&mut envelope)?;
        let created_at = envelope
            .metadata
            .as_ref()
            .map(|m| m.created_at_ns)
            .unwrap_or_default();
        let bucket = self.to_segment_id(created_at);

        let mut segments = self.segments.write();
        let segment = match segments.get(&bucket) {
            Some(segment) => segment.clone(),
            None => {
                let segment = Arc::new(Segment::open(&self.root, bucket, &self.config)?);
                segments.insert(bucket, segment.clone());
                segment
            }
        };
        let doc_id = segment.append_prepared(&envelope)?;

        Ok(DocRef {
            segment: bucket,
            doc_id,
        })
    }

    /// Segment containing `ns`, loading it from disk when its directory exists
    pub fn lookup_single(&self, ns: Timestamp) -> Result<Option<Arc<Segment>>> {
        self.segment(self.to_segment_id(ns))
    }

    /// Segment by bucket id, loading it from disk when its directory exists
    pub fn segment(&self, bucket: i64) -> Result<Option<Arc<Segment>>> {
        if let Some(segment) = self.segments.read().get(&bucket) {
            return Ok(Some(segment.clone()));
        }

        if !self.root.join(bucket.to_string()).is_dir() {
            return Ok(None);
        }

        let mut segments = self.segments.write();
        // another reader may have loaded it while we waited
        if let Some(segment) = segments.get(&bucket) {
            return Ok(Some(segment.clone()));
        }
        let segment = Arc::new(Segment::open(&self.root, bucket, &self.config)?);
        segments.insert(bucket, segment.clone());
        Ok(Some(segment))
    }

    /// Bucket ids present on disk or in memory, ascending
    pub fn list_segments(&self) -> Result<Vec<i64>> {
        let mut buckets: BTreeSet<i64> = self.segments.read().keys().copied().collect();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(bucket) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            {
                buckets.insert(bucket);
            }
        }

        Ok(buckets.into_iter().collect())
    }

    /// Start of every bucket intersecting `[from_sec, to_sec]`, in nanoseconds
    pub fn expand(&self, from_sec: i64, to_sec: i64) -> Vec<Timestamp> {
        if from_sec > to_sec {
            return Vec::new();
        }
        let step = self.config.segment_step;
        (self.bucket_of_sec(from_sec)..=self.bucket_of_sec(to_sec))
            .map(|bucket| bucket * step * NANOS_PER_SEC)
            .collect()
    }

    /// Run `query` over every segment intersecting `window`
    ///
    /// `visitor` receives `(segment, doc_id, score)` and returns `false` to
    /// stop. At most `limit` matches are delivered when `limit > 0`. A
    /// segment that fails to compile or read is logged and skipped.
    pub fn for_each<F>(&self, query: &Query, window: &TimeWindow, limit: usize, mut visitor: F) -> Result<usize>
    where
        F: FnMut(&Segment, u32, f32) -> bool,
    {
        query.validate()?;

        let first = self.bucket_of_sec(window.from_sec);
        let last = self.bucket_of_sec(window.to_sec);
        let mut delivered = 0;

        for bucket in self.list_segments()? {
            if bucket < first || bucket > last {
                continue;
            }
            let segment = match self.segment(bucket) {
                Ok(Some(segment)) => segment,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping segment {}: {}", bucket, e);
                    continue;
                }
            };

            let remaining = if limit > 0 { limit - delivered } else { 0 };
            match run_segment(&segment, query, window, remaining, &mut visitor) {
                Ok(run) => {
                    delivered += run.delivered;
                    if run.stopped || (limit > 0 && delivered >= limit) {
                        break;
                    }
                }
                Err(e) => warn!("Query failed in segment {}: {}", bucket, e),
            }
        }

        Ok(delivered)
    }

    /// Flush and drop every open segment
    pub fn close(&self) -> Result<()> {
        let mut segments = self.segments.write();
        for segment in segments.values() {
            segment.close()?;
        }
        segments.clear();
        Ok(())
    }

    /// Index statistics
    pub fn stats(&self) -> Result<IndexStats> {
        let buckets = self.list_segments()?;
        let open = self.segments.read();
        let segments: Vec<SegmentStats> = open
            .values()
            .map(|s| SegmentStats {
                bucket: s.bucket(),
                docs: s.doc_count(),
                forward_bytes: s.forward().size(),
            })
            .collect();

        Ok(IndexStats {
            segment_step: self.config.segment_step,
            segment_count: buckets.len(),
            open_segments: segments.len(),
            forward_bytes: segments.iter().map(|s| s.forward_bytes).sum(),
            segments,
        })
    }
}

impl Drop for SearchIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close index at {:?}: {}", self.root, e);
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub segment_step: i64,
    /// Segments on disk or open
    pub segment_count: usize,
    pub open_segments: usize,
    /// Forward log bytes across open segments
    pub forward_bytes: u64,
    pub segments: Vec<SegmentStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentStats {
    pub bucket: i64,
    pub docs: u32,
    pub forward_bytes: u64,
}
