//! Forward log: doc id -> stored event
//!
//! Records are written at 64-byte slot boundaries so a record id fits in 32
//! bits while addressing far more than 4 GiB. Each record carries its own
//! header and data checksums, which lets a scan step over a damaged slot
//! and pick up again at the next intact header.

mod log;
mod record;

pub use log::{ForwardLog, MAX_SLOTS};
pub use record::{checksum, encode_record, slots_for, RecordHeader, HEADER_SIZE, MAGIC, SLOT_SIZE};

/// File name of the forward log inside a segment directory
pub const FORWARD_FILE: &str = "main.bin";
