use std::sync::atomic::{AtomicU64, AtomicUsize};

use crate::atomic::{self, AtomicInt};
use crate::error::{new_error, Error, ErrorKind};
use crate::platform::CacheClean;
use crate::protocol::header::{LAST_TIMESTAMP_OFFSET, MAGIC_OFFSET};

use super::{
    Arena, HEADER_PARAMS_LENGTH, PARAM_BASE_POINTER, PARAM_BUFFER_LENGTH, PARAM_READ_OFFSET,
    PARAM_TOTAL_WRITTEN, PARAM_WRITE_OFFSET,
};

/// The part shared by the in-memory stores: the arena laid out as the
/// protocol header followed by the block area.
#[derive(Debug)]
pub(crate) struct MemoryRegion {
    arena: Arena,
    header_length: AtomicUsize,
    clean: CacheClean,
}

impl MemoryRegion {
    pub(crate) fn new(arena: Arena, clean: CacheClean) -> Self {
        Self {
            arena,
            header_length: AtomicUsize::new(0),
            clean,
        }
    }

    pub(crate) fn set_cache_clean(&mut self, clean: CacheClean) {
        self.clean = clean;
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub(crate) fn header_length(&self) -> usize {
        self.header_length.atomic_load()
    }

    /// Zero the header region and lay out the parameters for a block area of
    /// `align(arena.len() - header_length)` bytes. Returns that length.
    pub(crate) fn open(&self, header_length: usize, align: fn(usize) -> usize) -> Result<usize, Error> {
        if header_length < HEADER_PARAMS_LENGTH || header_length % 8 != 0 {
            return Err(new_error(ErrorKind::StoreInit));
        }
        if header_length > self.arena.len() {
            return Err(new_error(ErrorKind::BufferTooSmall));
        }

        let buffer_length = align(self.arena.len() - header_length);
        if buffer_length == 0 {
            return Err(new_error(ErrorKind::BufferTooSmall));
        }

        // The header is not published yet, nothing else reads it
        unsafe { self.arena.zero(0, header_length) };
        self.header_length.atomic_store(header_length);

        self.param(PARAM_BUFFER_LENGTH).atomic_store(buffer_length as u64);
        self.param(PARAM_WRITE_OFFSET).atomic_store(0);
        self.param(PARAM_READ_OFFSET).atomic_store(0);
        self.param(PARAM_TOTAL_WRITTEN).atomic_store(0);
        unsafe {
            self.arena
                .word_usize(header_length - HEADER_PARAMS_LENGTH + PARAM_BASE_POINTER)
                .atomic_store(self.arena.ptr_at(header_length) as usize);
        }

        atomic::dsb();
        Ok(buffer_length)
    }

    /// One of the 64-bit data store parameters.
    pub(crate) fn param(&self, field: usize) -> &AtomicU64 {
        let offset = self.header_length() - HEADER_PARAMS_LENGTH + field;
        unsafe { self.arena.word_u64(offset) }
    }

    pub(crate) fn clean_params(&self) {
        let offset = self.header_length() - HEADER_PARAMS_LENGTH;
        (self.clean)(self.arena.ptr_at(offset), HEADER_PARAMS_LENGTH);
    }

    /// Arena offset of `offset` within the block area.
    pub(crate) fn data_offset(&self, offset: usize) -> usize {
        self.header_length() + offset
    }

    pub(crate) fn ptr_at(&self, arena_offset: usize) -> *mut u8 {
        self.arena.ptr_at(arena_offset)
    }

    /// The length prefix of the block at `arena_offset`.
    pub(crate) fn prefix(&self, arena_offset: usize) -> &AtomicUsize {
        unsafe { self.arena.word_usize(arena_offset) }
    }

    pub(crate) fn clean(&self, arena_offset: usize, length: usize) {
        (self.clean)(self.arena.ptr_at(arena_offset), length);
    }

    /// # Safety
    ///
    /// The caller must own the region.
    pub(crate) unsafe fn zero(&self, arena_offset: usize, length: usize) {
        self.arena.zero(arena_offset, length)
    }

    /// Copy a new header image into place.
    ///
    /// The live fields (the magic, the last timestamp and the data store
    /// parameters) are skipped. The magic is then written from the image with
    /// its first word stored last, so a reader that sees it sees the rest.
    pub(crate) fn publish_header(&self, header: &[u8]) {
        let header_length = self.header_length();
        if header_length == 0 || header.len() < header_length {
            return;
        }

        let params = header_length - HEADER_PARAMS_LENGTH;
        unsafe {
            self.arena.write(MAGIC_OFFSET + 8, &header[MAGIC_OFFSET + 8..LAST_TIMESTAMP_OFFSET]);
            self.arena
                .write(LAST_TIMESTAMP_OFFSET + 8, &header[LAST_TIMESTAMP_OFFSET + 8..params]);
        }

        let word = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&header[at..at + 4]);
            u32::from_ne_bytes(bytes)
        };

        unsafe {
            self.arena.word_u32(MAGIC_OFFSET + 4).atomic_store(word(MAGIC_OFFSET + 4));
            atomic::dmb();
            self.arena.word_u32(MAGIC_OFFSET).atomic_store(word(MAGIC_OFFSET));
        }

        (self.clean)(self.arena.as_ptr(), header_length);
    }

    /// Raise the header's last timestamp.
    pub(crate) fn raise_last_timestamp(&self, timestamp: u64) {
        if self.header_length() == 0 {
            return;
        }

        let word = unsafe { self.arena.word_u64(LAST_TIMESTAMP_OFFSET) };
        if word.atomic_raise_to(timestamp) {
            (self.clean)(word as *const AtomicU64 as *const u8, 8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::no_cache_clean;

    fn align8(n: usize) -> usize {
        n & !7
    }

    #[test]
    fn test_open_lays_out_params() {
        let mut region = MemoryRegion::new(Arena::new(256), no_cache_clean);
        let len = region.open(96, align8).expect("open");
        assert_eq!(len, 160);
        assert_eq!(region.param(PARAM_BUFFER_LENGTH).atomic_load(), 160);
        assert_eq!(region.data_offset(8), 104);

        let base = region.ptr_at(96) as usize;
        let c = region.arena_mut().contents();
        let n = std::mem::size_of::<usize>();
        let mut bytes = [0u8; std::mem::size_of::<usize>()];
        bytes.copy_from_slice(&c[88..88 + n]);
        assert_eq!(usize::from_ne_bytes(bytes), base);
    }

    #[test]
    fn test_open_too_small() {
        let region = MemoryRegion::new(Arena::new(64), no_cache_clean);
        let err = region.open(128, align8).expect_err("fits");
        assert_eq!(err.kind(), &ErrorKind::BufferTooSmall);

        let err = region.open(64, align8).expect_err("no block area");
        assert_eq!(err.kind(), &ErrorKind::BufferTooSmall);
    }

    #[test]
    fn test_publish_skips_live_fields() {
        let mut region = MemoryRegion::new(Arena::new(256), no_cache_clean);
        region.open(96, align8).expect("open");
        region.raise_last_timestamp(77);

        let mut image = vec![0xaau8; 96];
        image[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        region.publish_header(&image);

        let c = region.arena_mut().contents();
        assert_eq!(&c[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(c[8], 0xaa);
        assert_eq!(&c[24..32], &77u64.to_ne_bytes());
        assert_eq!(c[32], 0xaa);
        assert_eq!(c[55], 0xaa);
        assert_eq!(&c[56..64], &160u64.to_ne_bytes());
    }

    #[test]
    fn test_last_timestamp_only_rises() {
        let mut region = MemoryRegion::new(Arena::new(128), no_cache_clean);
        region.raise_last_timestamp(5);
        region.open(96, align8).expect("open");
        region.raise_last_timestamp(10);
        region.raise_last_timestamp(3);

        let c = region.arena_mut().contents();
        assert_eq!(&c[24..32], &10u64.to_ne_bytes());
    }
}
