//! Inverted postings store
//!
//! One flat file per `(field, value)` pair holding 8-byte little-endian
//! postings `doc_id << 32 | second` in append order. Doc ids are assigned
//! monotonically within a segment, so every file is sorted by doc id
//! without a sort step.

mod buffered;
mod eager;

pub use buffered::BufferedWriter;
pub use eager::EagerWriter;

use crate::config::{IndexConfig, PostingsMode};
use crate::dictionary::{PostingsPath, INVERTED_DIR};
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Size of one posting on disk
pub const POSTING_SIZE: usize = 8;

/// Pack a posting
pub fn pack(doc_id: u32, second: u32) -> u64 {
    ((doc_id as u64) << 32) | second as u64
}

/// Split a posting into `(doc_id, second)`
pub fn unpack(posting: u64) -> (u32, u32) {
    ((posting >> 32) as u32, posting as u32)
}

/// Destination for postings appends
///
/// Both writers produce byte-identical files for the same append order.
pub trait PostingsWriter: Send + Sync {
    /// Append one posting to the file at `path`
    fn append(&self, path: &Path, posting: u64) -> Result<()>;

    /// Every byte accepted for `path`, on disk or not
    ///
    /// Must not observe a flush half done.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Length in bytes of what [`PostingsWriter::read`] would return
    fn len(&self, path: &Path) -> Result<u64>;

    /// Push everything accepted so far to disk
    fn flush(&self) -> Result<()>;
}

/// Postings tree rooted at `<segment>/inv`
pub struct InvertedStore {
    root: PathBuf,
    writer: Box<dyn PostingsWriter>,
}

impl InvertedStore {
    /// Open the store under a segment directory
    pub fn open(segment_dir: &Path, config: &IndexConfig) -> Result<Self> {
        let root = segment_dir.join(INVERTED_DIR);
        fs::create_dir_all(&root)?;

        let writer: Box<dyn PostingsWriter> = match config.postings_mode {
            PostingsMode::Eager => Box::new(EagerWriter::new(config.fd_cache_size)),
            PostingsMode::Buffered => Box::new(BufferedWriter::new(config.buffered_flush_bytes)),
        };

        Ok(Self { root, writer })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the postings file for a pair
    pub fn path_of(&self, field: &str, value: &str) -> PathBuf {
        PostingsPath::new(field, value).full(&self.root)
    }

    pub fn append(&self, field: &str, value: &str, doc_id: u32, second: u32) -> Result<()> {
        self.append_at(&self.path_of(field, value), doc_id, second)
    }

    /// Append to a path previously returned by [`InvertedStore::path_of`]
    pub fn append_at(&self, path: &Path, doc_id: u32, second: u32) -> Result<()> {
        self.writer.append(path, pack(doc_id, second))
    }

    /// Postings in file order; with `max_tail > 0` only the last `max_tail`
    ///
    /// A missing file reads as an empty list.
    pub fn read(&self, field: &str, value: &str, max_tail: usize) -> Result<Vec<u64>> {
        let data = self.writer.read(&self.path_of(field, value))?;

        // a torn trailing posting is ignored
        let count = data.len() / POSTING_SIZE;
        let skip = if max_tail > 0 && count > max_tail {
            count - max_tail
        } else {
            0
        };

        Ok(data
            .chunks_exact(POSTING_SIZE)
            .skip(skip)
            .map(|chunk| {
                let mut buf = [0u8; POSTING_SIZE];
                buf.copy_from_slice(chunk);
                u64::from_le_bytes(buf)
            })
            .collect())
    }

    /// Number of postings stored for a pair
    pub fn size(&self, field: &str, value: &str) -> Result<u64> {
        let len = self.writer.len(&self.path_of(field, value))?;
        Ok(len / POSTING_SIZE as u64)
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }
}

/// Contents of a postings file, empty when it does not exist
pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Open a postings file for appending, creating its shard directory
pub(crate) fn open_for_append(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(fs::OpenOptions::new().create(true).append(true).open(path)?)
}
