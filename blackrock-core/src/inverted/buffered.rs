//! In-memory postings buffer flushed in bulk

use super::{file_len, open_for_append, read_file, PostingsWriter};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Collects `path -> bytes` and writes them out once `flush_bytes` accumulate
///
/// Reads hold the buffer lock across the disk read, so a concurrent flush is
/// seen either entirely or not at all.
pub struct BufferedWriter {
    state: Mutex<BufferState>,
    flush_bytes: usize,
}

#[derive(Default)]
struct BufferState {
    pending: HashMap<PathBuf, Vec<u8>>,
    bytes: usize,
}

impl BufferedWriter {
    pub fn new(flush_bytes: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            flush_bytes,
        }
    }

    /// Write every pending file; a file stays pending until its write succeeds
    ///
    /// One failing file does not stop the others. The first error is returned.
    fn flush_state(state: &mut BufferState) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }
        debug!(
            "Flushing {} buffered postings files ({} bytes)",
            state.pending.len(),
            state.bytes
        );

        let mut failure = None;
        let paths: Vec<PathBuf> = state.pending.keys().cloned().collect();
        for path in paths {
            let written = match state.pending.get(&path) {
                Some(data) => write_whole(&path, data),
                None => continue,
            };
            match written {
                Ok(()) => {
                    state.pending.remove(&path);
                }
                Err(e) => {
                    warn!("Failed to flush postings to {:?}: {}", path, e);
                    failure.get_or_insert(e);
                }
            }
        }

        state.bytes = state.pending.values().map(Vec::len).sum();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Append `data` to `path`, truncating back on a short write
fn write_whole(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = open_for_append(path)?;
    let len = file.metadata()?.len();
    if let Err(e) = file.write_all(data) {
        file.set_len(len)?;
        return Err(e.into());
    }
    Ok(())
}

impl PostingsWriter for BufferedWriter {
    fn append(&self, path: &Path, posting: u64) -> Result<()> {
        let mut state = self.state.lock();
        state
            .pending
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(&posting.to_le_bytes());
        state.bytes += 8;

        if state.bytes >= self.flush_bytes {
            Self::flush_state(&mut state)?;
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let mut data = read_file(path)?;
        if let Some(pending) = state.pending.get(path) {
            data.extend_from_slice(pending);
        }
        Ok(data)
    }

    fn len(&self, path: &Path) -> Result<u64> {
        let state = self.state.lock();
        let pending = state.pending.get(path).map_or(0, |p| p.len() as u64);
        Ok(file_len(path)? + pending)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_state(&mut state)
    }
}
