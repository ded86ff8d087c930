//! Forward record header codec

use crate::dictionary::metro_hash_64;
use crate::{BlackrockError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Record slot size; every record starts on a slot boundary
pub const SLOT_SIZE: u64 = 64;

/// Header length in bytes
pub const HEADER_SIZE: usize = 16;

/// Marker at header bytes 8..12
pub const MAGIC: [u8; 4] = [0x0B, 0x0E, 0x0E, 0x0F];

/// Decoded record header
///
/// Layout (little-endian):
/// - 4 bytes: payload length
/// - 4 bytes: data checksum (MetroHash64 of payload, truncated)
/// - 4 bytes: magic `0B 0E 0E 0F`
/// - 4 bytes: header checksum (MetroHash64 of bytes 0..12, truncated)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub len: u32,
    pub data_checksum: u32,
}

impl RecordHeader {
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            len: payload.len() as u32,
            data_checksum: checksum(payload),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u32_le(self.len);
        buf.put_u32_le(self.data_checksum);
        buf.put_slice(&MAGIC);
        let header_checksum = checksum(&buf[..12]);
        buf.put_u32_le(header_checksum);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Verify magic and header checksum
    pub fn decode(slot: u32, data: &[u8; HEADER_SIZE]) -> Result<Self> {
        if data[8..12] != MAGIC {
            return Err(BlackrockError::ChecksumMismatch {
                slot,
                expected: u32::from_le_bytes(MAGIC),
                actual: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            });
        }

        let mut cursor = &data[..];
        let len = cursor.get_u32_le();
        let data_checksum = cursor.get_u32_le();
        cursor.advance(4);
        let stored = cursor.get_u32_le();
        let actual = checksum(&data[..12]);
        if stored != actual {
            return Err(BlackrockError::ChecksumMismatch {
                slot,
                expected: stored,
                actual,
            });
        }

        Ok(Self { len, data_checksum })
    }

    /// Slots occupied by header plus payload
    pub fn slots(&self) -> u64 {
        slots_for(self.len as usize)
    }
}

/// MetroHash64 truncated to its low 32 bits
pub fn checksum(data: &[u8]) -> u32 {
    metro_hash_64(data) as u32
}

/// `ceil((16 + len) / 64)`
pub fn slots_for(payload_len: usize) -> u64 {
    (HEADER_SIZE as u64 + payload_len as u64 + SLOT_SIZE - 1) / SLOT_SIZE
}

/// Header, payload and zero padding up to the next slot boundary
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader::for_payload(payload);
    let total = (slots_for(payload.len()) * SLOT_SIZE) as usize;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf.resize(total, 0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_for() {
        assert_eq!(slots_for(0), 1);
        assert_eq!(slots_for(48), 1);
        assert_eq!(slots_for(49), 2);
        assert_eq!(slots_for(112), 2);
        assert_eq!(slots_for(113), 3);
    }

    #[test]
    fn test_header_layout() {
        let header = RecordHeader::for_payload(b"hello");
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &MAGIC);
        assert_eq!(
            u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            checksum(&bytes[..12])
        );
        assert_eq!(RecordHeader::decode(0, &bytes).unwrap(), header);
    }

    #[test]
    fn test_header_corruption() {
        let mut bytes = RecordHeader::for_payload(b"hello").encode();
        bytes[9] = 0;
        assert!(matches!(
            RecordHeader::decode(3, &bytes),
            Err(BlackrockError::ChecksumMismatch { slot: 3, .. })
        ));

        let mut bytes = RecordHeader::for_payload(b"hello").encode();
        bytes[0] ^= 0xFF;
        assert!(RecordHeader::decode(0, &bytes).is_err());
    }

    #[test]
    fn test_encode_record_padding() {
        let rec = encode_record(&[7u8; 50]);
        assert_eq!(rec.len(), 128);
        assert!(rec[66..].iter().all(|b| *b == 0));
    }
}
