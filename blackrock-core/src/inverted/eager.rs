//! Write-through postings writer

use super::{file_len, open_for_append, read_file, PostingsWriter};
use crate::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Appends every posting immediately; open descriptors live in an LRU
pub struct EagerWriter {
    files: Mutex<LruCache<PathBuf, File>>,
}

impl EagerWriter {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            files: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl PostingsWriter for EagerWriter {
    fn append(&self, path: &Path, posting: u64) -> Result<()> {
        let mut files = self.files.lock();
        if !files.contains(path) {
            let file = open_for_append(path)?;
            files.put(path.to_path_buf(), file);
        }
        if let Some(file) = files.get_mut(path) {
            file.write_all(&posting.to_le_bytes())?;
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        read_file(path)
    }

    fn len(&self, path: &Path) -> Result<u64> {
        file_len(path)
    }

    fn flush(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, file) in files.iter_mut() {
            file.flush()?;
        }
        files.clear();
        Ok(())
    }
}
