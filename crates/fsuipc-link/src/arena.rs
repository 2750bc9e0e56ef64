//! Append-only writer for the request stream.
//!
//! All cursor and capacity arithmetic for the shared region lives here, so
//! the batch-fits-in-the-buffer invariant is checked in one place instead of
//! at every call site. The arena never owns the bytes; callers hand it the
//! mapped region for each operation.

use snafu::ensure;

use crate::{
    error::{BufferFullSnafu, LinkError},
    wire::{ReadHeader, TAG_SIZE, WriteHeader},
};

/// Usable capacity of the request stream, matching the peer's limit.
pub const MAX_BATCH_BYTES: usize = 0x7F00;

/// Slack allocated past the capacity so the terminator and the peer's own
/// bookkeeping never touch unmapped memory.
pub const REGION_SLACK: usize = 256;

/// Cursor bookkeeping for one batch.
///
/// Invariant: `cursor <= capacity`, and the region handed to every method is
/// at least `capacity + TAG_SIZE` bytes long.
#[derive(Debug)]
pub struct RequestArena {
    cursor: usize,
    capacity: usize,
}

impl RequestArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            cursor: 0,
            capacity,
        }
    }

    /// True when nothing has been appended since the last terminate/rewind.
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Bytes the current batch occupies.
    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fail with `BufferFull` unless `needed` more bytes plus the terminator
    /// still fit. Leaves the cursor untouched on failure.
    fn ensure_room(&self, needed: usize) -> Result<(), LinkError> {
        let free = self.capacity - self.cursor;
        ensure!(needed + TAG_SIZE <= free, BufferFullSnafu { needed, free });
        Ok(())
    }

    /// Append a read header followed by a zeroed placeholder for the reply.
    pub fn push_read(
        &mut self,
        region: &mut [u8],
        header: ReadHeader,
    ) -> Result<(), LinkError> {
        let payload = header.size as usize;
        self.ensure_room(ReadHeader::SIZE + payload)?;

        let start = self.cursor;
        region[start..start + ReadHeader::SIZE]
            .copy_from_slice(&header.encode());
        region[start + ReadHeader::SIZE..start + ReadHeader::SIZE + payload]
            .fill(0);
        self.cursor = start + ReadHeader::SIZE + payload;
        Ok(())
    }

    /// Append a write header followed by the caller's payload. An empty
    /// payload is legal and writes nothing past the header.
    pub fn push_write(
        &mut self,
        region: &mut [u8],
        header: WriteHeader,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        debug_assert_eq!(header.size as usize, payload.len());
        self.ensure_room(WriteHeader::SIZE + payload.len())?;

        let start = self.cursor;
        region[start..start + WriteHeader::SIZE]
            .copy_from_slice(&header.encode());
        region[start + WriteHeader::SIZE
            ..start + WriteHeader::SIZE + payload.len()]
            .copy_from_slice(payload);
        self.cursor = start + WriteHeader::SIZE + payload.len();
        Ok(())
    }

    /// Zero the tag right past the last operation and rewind the cursor.
    ///
    /// The zero tag tells the peer where the request list ends; rewinding
    /// means the next batch overwrites from the top while the peer works its
    /// way down to the terminator.
    pub fn terminate(&mut self, region: &mut [u8]) {
        region[self.cursor..self.cursor + TAG_SIZE].fill(0);
        self.cursor = 0;
    }

    /// Rewind without touching the region.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_region(capacity: usize) -> (RequestArena, Vec<u8>) {
        (RequestArena::new(capacity), vec![0xAAu8; capacity + REGION_SLACK])
    }

    #[test]
    fn appends_advance_the_cursor_by_header_plus_payload() {
        let (mut arena, mut region) = arena_with_region(256);

        arena
            .push_read(&mut region, ReadHeader::new(0x034E, 2, 0))
            .unwrap();
        assert_eq!(arena.used(), ReadHeader::SIZE + 2);

        arena
            .push_write(&mut region, WriteHeader::new(0x330A, 2), &[0xD2, 0x07])
            .unwrap();
        assert_eq!(arena.used(), ReadHeader::SIZE + 2 + WriteHeader::SIZE + 2);
    }

    #[test]
    fn read_placeholder_is_zeroed() {
        let (mut arena, mut region) = arena_with_region(256);
        arena
            .push_read(&mut region, ReadHeader::new(0x05C4, 4, 3))
            .unwrap();
        assert_eq!(&region[ReadHeader::SIZE..ReadHeader::SIZE + 4], &[0; 4]);
    }

    #[test]
    fn empty_payload_write_is_legal() {
        let (mut arena, mut region) = arena_with_region(64);
        arena
            .push_write(&mut region, WriteHeader::new(0x1000, 0), &[])
            .unwrap();
        assert_eq!(arena.used(), WriteHeader::SIZE);
    }

    #[test]
    fn overflow_fails_and_leaves_the_arena_untouched() {
        let capacity = ReadHeader::SIZE + 8 + TAG_SIZE;
        let (mut arena, mut region) = arena_with_region(capacity);

        arena
            .push_read(&mut region, ReadHeader::new(0x4000, 8, 0))
            .unwrap();
        let used = arena.used();
        let snapshot = region.clone();

        let err = arena
            .push_read(&mut region, ReadHeader::new(0x4008, 1, 1))
            .unwrap_err();
        assert!(matches!(err, LinkError::BufferFull { .. }));
        assert_eq!(arena.used(), used);
        assert_eq!(region, snapshot);
    }

    #[test]
    fn the_terminator_margin_is_reserved() {
        // a batch that would fill the capacity exactly leaves no room for
        // the 4-byte terminator and must be refused
        let capacity = WriteHeader::SIZE + TAG_SIZE;
        let (mut arena, mut region) = arena_with_region(capacity);

        arena
            .push_write(&mut region, WriteHeader::new(0, 0), &[])
            .unwrap();
        let err = arena
            .push_write(&mut region, WriteHeader::new(0, 0), &[])
            .unwrap_err();
        assert!(matches!(err, LinkError::BufferFull { .. }));
    }

    #[test]
    fn terminate_zeroes_the_tag_and_rewinds() {
        let (mut arena, mut region) = arena_with_region(128);
        arena
            .push_write(&mut region, WriteHeader::new(0x2000, 1), &[0xFF])
            .unwrap();
        let end = arena.used();

        arena.terminate(&mut region);
        assert!(arena.is_empty());
        assert_eq!(&region[end..end + TAG_SIZE], &[0; TAG_SIZE]);
    }
}
