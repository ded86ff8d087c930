//! Append-only forward log

use super::record::{checksum, encode_record, RecordHeader, HEADER_SIZE, SLOT_SIZE};
use crate::{BlackrockError, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Slot ids stay below `i32::MAX` so they never collide with the
/// iterators' `NO_MORE` sentinel.
pub const MAX_SLOTS: u64 = i32::MAX as u64;

/// Slot-padded record file: record id == byte offset / 64
pub struct ForwardLog {
    path: PathBuf,
    file: File,
    next_slot: AtomicU64,
}

impl ForwardLog {
    /// Open or create the log at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        let next_slot = (len + SLOT_SIZE - 1) / SLOT_SIZE;
        debug!("Opened forward log {:?} at slot {}", path, next_slot);

        Ok(Self {
            path,
            file,
            next_slot: AtomicU64::new(next_slot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a payload and return its record id
    ///
    /// The slot range is reserved with a single atomic bump, so concurrent
    /// appends write disjoint byte ranges.
    pub fn append(&self, payload: &[u8]) -> Result<u32> {
        let record = encode_record(payload);
        let slots = record.len() as u64 / SLOT_SIZE;

        let slot = self
            .next_slot
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let end = current + slots;
                (end <= MAX_SLOTS).then_some(end)
            })
            .map_err(|_| BlackrockError::SegmentFull {
                path: self.path.clone(),
            })?;

        self.file.write_all_at(&record, slot * SLOT_SIZE)?;
        Ok(slot as u32)
    }

    /// Read the record at `id`, returning its payload and the id of the next record
    pub fn read(&self, id: u32) -> Result<(Vec<u8>, u32)> {
        let slot = id as u64;
        if slot >= self.next_slot.load(Ordering::SeqCst) {
            return Err(BlackrockError::Eof);
        }

        let offset = slot * SLOT_SIZE;
        let mut header_buf = [0u8; HEADER_SIZE];
        self.read_exact_at(&mut header_buf, offset)?;
        let header = RecordHeader::decode(id, &header_buf)?;

        let end = slot + header.slots();
        if end > self.next_slot.load(Ordering::SeqCst) {
            // length field claims bytes past the end of the file
            return Err(BlackrockError::ChecksumMismatch {
                slot: id,
                expected: header.data_checksum,
                actual: 0,
            });
        }

        let mut payload = vec![0u8; header.len as usize];
        self.read_exact_at(&mut payload, offset + HEADER_SIZE as u64)?;
        let actual = checksum(&payload);
        if actual != header.data_checksum {
            return Err(BlackrockError::ChecksumMismatch {
                slot: id,
                expected: header.data_checksum,
                actual,
            });
        }

        Ok((payload, end as u32))
    }

    /// Visit every valid record starting at `from`, in append order
    ///
    /// Corrupt records are skipped one slot at a time until the header
    /// re-syncs. The visitor returns `false` to stop early. Returns the id
    /// from which a later scan can resume.
    pub fn scan<F>(&self, from: u32, mut visitor: F) -> Result<u32>
    where
        F: FnMut(u32, &[u8]) -> bool,
    {
        let mut id = from;
        loop {
            match self.read(id) {
                Ok((payload, next)) => {
                    let keep_going = visitor(id, &payload);
                    id = next;
                    if !keep_going {
                        return Ok(id);
                    }
                }
                Err(BlackrockError::Eof) => return Ok(id),
                Err(BlackrockError::ChecksumMismatch { slot, .. }) => {
                    warn!("Skipping corrupt forward slot {} in {:?}", slot, self.path);
                    id += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Size of the log in bytes (slot aligned)
    pub fn size(&self) -> u64 {
        self.next_slot.load(Ordering::SeqCst) * SLOT_SIZE
    }

    /// Id the next append will receive
    pub fn next_id(&self) -> u32 {
        self.next_slot.load(Ordering::SeqCst) as u32
    }

    /// Force data to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        match self.file.read_exact_at(buf, offset) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(BlackrockError::Eof),
            Err(e) => Err(e.into()),
        }
    }
}
