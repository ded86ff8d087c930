//! Per-partition sidecar files: the consumed-offset checkpoint and the
//! exclusive consumer lock

use crate::dictionary::metro_hash_64;
use crate::{BlackrockError, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stream sentinel: start from the oldest retained message
pub const OFFSET_FIRST: i64 = -2;

/// Size of an offset sidecar on disk
pub const OFFSET_FILE_SIZE: usize = 16;

pub fn lock_path(index_root: &Path, partition: u32) -> PathBuf {
    index_root.join(format!("partition_{}.lock", partition))
}

pub fn offset_path(index_root: &Path, partition: u32) -> PathBuf {
    index_root.join(format!("partition_{}.offset", partition))
}

/// Last offset ingested from a partition
///
/// Layout: offset as u64 LE, then the metro hash of those 8 bytes as u64 LE.
pub struct OffsetSidecar {
    path: PathBuf,
    file: File,
}

impl OffsetSidecar {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored offset, or `default` when nothing was stored yet
    pub fn read_or_default(&self, default: i64) -> Result<i64> {
        let len = self.file.metadata()?.len();
        if len == 0 {
            return Ok(default);
        }
        if len != OFFSET_FILE_SIZE as u64 {
            return Err(self.corrupt());
        }

        let mut buf = [0u8; OFFSET_FILE_SIZE];
        self.file.read_exact_at(&mut buf, 0)?;
        let (value, hash) = buf.split_at(8);

        let mut stored = [0u8; 8];
        stored.copy_from_slice(hash);
        if u64::from_le_bytes(stored) != metro_hash_64(value) {
            return Err(self.corrupt());
        }

        let mut offset = [0u8; 8];
        offset.copy_from_slice(value);
        Ok(u64::from_le_bytes(offset) as i64)
    }

    /// Record `offset` in one 16-byte positional write
    pub fn set(&self, offset: i64) -> Result<()> {
        let value = (offset as u64).to_le_bytes();
        let mut buf = [0u8; OFFSET_FILE_SIZE];
        buf[..8].copy_from_slice(&value);
        buf[8..].copy_from_slice(&metro_hash_64(&value).to_le_bytes());
        self.file.write_all_at(&buf, 0)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn corrupt(&self) -> BlackrockError {
        BlackrockError::OffsetCorrupt {
            path: self.path.clone(),
        }
    }
}

/// Exclusive advisory lock on a partition, released on drop
pub struct PartitionLock {
    path: PathBuf,
    file: File,
}

impl PartitionLock {
    /// Take the lock without blocking
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(BlackrockError::PartitionLocked { path });
            }
            return Err(err.into());
        }

        debug!("Locked {:?}", path);
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PartitionLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!("Unlocked {:?}", self.path);
    }
}
