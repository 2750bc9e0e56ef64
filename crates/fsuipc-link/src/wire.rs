//! Binary layout of the request/response stream.
//!
//! A batch is a sequence of operations packed back to back from the start of
//! the shared region:
//!
//! ```text
//! ┌───────────────┐
//! │ tag: u32      │  <- 1 = read, 2 = write, 0 = end of batch
//! │ offset: u32   │  <- location in the peer's address space
//! │ size: u32     │  <- payload length in bytes
//! │ target_id: u32│  <- read only: binds the reply to a queued request
//! │ payload...    │  <- reads: zeroed placeholder; writes: caller bytes
//! └───────────────┘
//! ```
//!
//! The peer answers in place: read placeholders are overwritten with data,
//! headers are echoed back unchanged. Tag values and field order are a
//! bit-exact contract with the peer process; everything is little-endian.

use num_enum::TryFromPrimitive;

/// Operation tag leading every header. A zero tag terminates the batch.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum OpTag {
    Read = 1,
    Write = 2,
}

/// Width of a bare tag, and of the batch terminator.
pub const TAG_SIZE: usize = 4;

/// Header of a read operation, followed by `size` placeholder bytes the
/// peer fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHeader {
    pub tag: u32,
    pub offset: u32,
    pub size: u32,
    pub target_id: u32,
}

/// Header of a write operation, followed by `size` payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteHeader {
    pub tag: u32,
    pub offset: u32,
    pub size: u32,
}

impl ReadHeader {
    pub const SIZE: usize = 16;

    pub fn new(offset: u32, size: u32, target_id: u32) -> Self {
        Self {
            tag: OpTag::Read as u32,
            offset,
            size,
            target_id,
        }
    }

    /// Serialize to the wire layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.tag.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.target_id.to_le_bytes());
        bytes
    }

    /// Deserialize the header at `at`, or `None` if the region ends before
    /// a full header.
    pub fn decode_at(region: &[u8], at: usize) -> Option<Self> {
        let bytes = region.get(at..at.checked_add(Self::SIZE)?)?;
        Some(Self {
            tag: le_u32(&bytes[0..4]),
            offset: le_u32(&bytes[4..8]),
            size: le_u32(&bytes[8..12]),
            target_id: le_u32(&bytes[12..16]),
        })
    }
}

impl WriteHeader {
    pub const SIZE: usize = 12;

    pub fn new(offset: u32, size: u32) -> Self {
        Self {
            tag: OpTag::Write as u32,
            offset,
            size,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.tag.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn decode_at(region: &[u8], at: usize) -> Option<Self> {
        let bytes = region.get(at..at.checked_add(Self::SIZE)?)?;
        Some(Self {
            tag: le_u32(&bytes[0..4]),
            offset: le_u32(&bytes[4..8]),
            size: le_u32(&bytes[8..12]),
        })
    }
}

/// Read the 4-byte tag at `at`, if one still fits in the region.
pub fn peek_tag(region: &[u8], at: usize) -> Option<u32> {
    region
        .get(at..at.checked_add(TAG_SIZE)?)
        .map(|bytes| le_u32(bytes))
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("slice is 4 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_header_round_trips_at_unaligned_offset() {
        let header = ReadHeader::new(0x3304, 4, 17);
        let mut region = vec![0u8; 64];
        // land the header on a misaligned boundary, like any header after a
        // 2-byte read placeholder
        region[18..18 + ReadHeader::SIZE].copy_from_slice(&header.encode());

        let decoded = ReadHeader::decode_at(&region, 18).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.tag, OpTag::Read as u32);
    }

    #[test]
    fn write_header_round_trips() {
        let header = WriteHeader::new(0x330A, 2);
        let mut region = vec![0u8; 32];
        region[..WriteHeader::SIZE].copy_from_slice(&header.encode());

        assert_eq!(WriteHeader::decode_at(&region, 0).unwrap(), header);
    }

    #[test]
    fn decode_past_the_end_is_none() {
        let region = vec![0u8; 10];
        assert!(ReadHeader::decode_at(&region, 0).is_none());
        assert!(WriteHeader::decode_at(&region, 4).is_none());
        assert!(peek_tag(&region, 8).is_none());
        assert!(peek_tag(&region, usize::MAX).is_none());
    }

    #[test]
    fn tag_values_match_the_peer_contract() {
        assert_eq!(OpTag::try_from(1).unwrap(), OpTag::Read);
        assert_eq!(OpTag::try_from(2).unwrap(), OpTag::Write);
        assert!(OpTag::try_from(0).is_err());
        assert!(OpTag::try_from(3).is_err());
    }
}
