//! Segment - one time bucket holding a forward log and an inverted store

use crate::config::IndexConfig;
use crate::forward::{ForwardLog, FORWARD_FILE};
use crate::inverted::InvertedStore;
use crate::prepare::prepare;
use crate::{Envelope, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Synthetic field indexed on every ingest
pub const MATCH_ALL_FIELD: &str = "blackrock";
/// Synthetic value indexed on every ingest
pub const MATCH_ALL_VALUE: &str = "match_all";

/// Field under which the event type is indexed
pub const EVENT_TYPE_FIELD: &str = "event_type";

/// A time-bucketed unit of storage
///
/// Ingest is serialized by the segment's own mutex; reads go straight to the
/// forward log and postings files.
pub struct Segment {
    bucket: i64,
    dir: PathBuf,
    forward: ForwardLog,
    inverted: InvertedStore,
    cache: Option<Mutex<LruCache<u32, Arc<Vec<u8>>>>>,
    whitelist: HashSet<String>,
    ingest_lock: Mutex<()>,
    sync_on_close: bool,
    docs: AtomicU32,
}

impl Segment {
    /// Open or create the segment for `bucket` under `index_root`
    pub fn open(index_root: &Path, bucket: i64, config: &IndexConfig) -> Result<Self> {
        let dir = index_root.join(bucket.to_string());
        std::fs::create_dir_all(&dir)?;

        let forward = ForwardLog::open(dir.join(FORWARD_FILE))?;
        let inverted = InvertedStore::open(&dir, config)?;
        let cache = NonZeroUsize::new(config.forward_cache_size)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        let whitelist = config
            .whitelist
            .iter()
            .map(|k| crate::dictionary::sanitize(k))
            .collect();

        let mut docs = 0u32;
        forward.scan(0, |_, _| {
            docs += 1;
            true
        })?;

        info!("Opened segment {} ({} docs, {} bytes)", bucket, docs, forward.size());

        Ok(Self {
            bucket,
            dir,
            forward,
            inverted,
            cache,
            whitelist,
            ingest_lock: Mutex::new(()),
            sync_on_close: config.sync_on_close,
            docs: AtomicU32::new(docs),
        })
    }

    pub fn bucket(&self) -> i64 {
        self.bucket
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn forward(&self) -> &ForwardLog {
        &self.forward
    }

    pub fn inverted(&self) -> &InvertedStore {
        &self.inverted
    }

    /// Readable documents, not counting slots taken by record continuations
    pub fn doc_count(&self) -> u32 {
        self.docs.load(Ordering::Relaxed)
    }

    /// Prepare and index an envelope, returning its doc id
    pub fn ingest(&self, mut envelope: Envelope) -> Result<u32> {
        prepare(&mut envelope)?;
        self.append_prepared(&envelope)
    }

    /// Index an envelope that already went through [`prepare`]
    ///
    /// The forward record is written before any posting. If a postings
    /// append fails the record stays in the forward log with partial
    /// inverted coverage.
    pub fn append_prepared(&self, envelope: &Envelope) -> Result<u32> {
        let metadata = envelope
            .metadata
            .as_ref()
            .ok_or(crate::BlackrockError::MissingMetadata)?;
        let encoded = envelope.encode()?;
        let second = metadata.created_at_sec().clamp(0, u32::MAX as i64) as u32;

        let _guard = self.ingest_lock.lock();
        let doc_id = self.forward.append(&encoded)?;
        self.docs.fetch_add(1, Ordering::Relaxed);

        let user_terms = metadata
            .search
            .iter()
            .filter(|kv| self.is_indexed(&kv.key))
            .map(|kv| (kv.key.as_str(), kv.value.as_str()));
        let fixed_terms = [
            (metadata.foreign_type.as_str(), metadata.foreign_id.as_str()),
            (EVENT_TYPE_FIELD, metadata.event_type.as_str()),
            (MATCH_ALL_FIELD, MATCH_ALL_VALUE),
        ];

        // pairs that sanitize to the same file get one posting per doc
        let mut written: HashSet<PathBuf> = HashSet::new();
        for (field, value) in user_terms.chain(fixed_terms) {
            let path = self.inverted.path_of(field, value);
            if written.contains(&path) {
                continue;
            }
            self.inverted.append_at(&path, doc_id, second)?;
            written.insert(path);
        }

        debug!("Indexed doc {} in segment {}", doc_id, self.bucket);
        Ok(doc_id)
    }

    /// Whitelisting applies to user search keys; derived time tags always pass
    fn is_indexed(&self, key: &str) -> bool {
        if self.whitelist.is_empty() {
            return true;
        }
        let key = crate::dictionary::sanitize(key);
        self.whitelist.contains(&key)
            || matches!(
                key.as_str(),
                crate::prepare::TAG_YEAR
                    | crate::prepare::TAG_YEAR_MONTH
                    | crate::prepare::TAG_YEAR_MONTH_DAY
                    | crate::prepare::TAG_YEAR_MONTH_DAY_HOUR
            )
    }

    /// Raw stored bytes of a document
    pub fn read_forward(&self, doc_id: u32) -> Result<Arc<Vec<u8>>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(&doc_id) {
                return Ok(hit.clone());
            }
        }

        let (data, _) = self.forward.read(doc_id)?;
        let data = Arc::new(data);
        if let Some(cache) = &self.cache {
            cache.lock().put(doc_id, data.clone());
        }
        Ok(data)
    }

    /// Stored document decoded back into an envelope
    pub fn read_forward_decode(&self, doc_id: u32) -> Result<Envelope> {
        let data = self.read_forward(doc_id)?;
        Envelope::decode(&data)
    }

    /// Postings for a pair, all of them when `max_tail` is 0
    pub fn postings(&self, field: &str, value: &str, max_tail: usize) -> Result<Vec<u64>> {
        self.inverted.read(field, value, max_tail)
    }

    /// Flush buffered postings and sync the forward log
    pub fn close(&self) -> Result<()> {
        let _guard = self.ingest_lock.lock();
        self.inverted.flush()?;
        if self.sync_on_close {
            self.forward.sync()?;
        }
        info!("Closed segment {}", self.bucket);
        Ok(())
    }
}
