use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::atomic::{self, AtomicInt};
use crate::error::{new_error, Error, ErrorKind};
use crate::platform::{no_cache_clean, CacheClean};

use super::memory::MemoryRegion;
use super::{
    align_block, decode_length, encode_length, Arena, Block, DataStore, DataStoreType,
    BLOCK_PREFIX, PARAM_READ_OFFSET, PARAM_TOTAL_WRITTEN, PARAM_WRITE_OFFSET,
};

const NO_RESERVED_TAIL: u64 = !0;

enum Space {
    Free,
    Full,
    Stale,
}

/// A buffer that overwrites its oldest blocks when it runs out of space.
///
/// `head` and `tail` only ever increase; the position in the block area is
/// the offset modulo its length. A core that is filling a block reserves the
/// tail it started from, and no core frees blocks beyond the lowest
/// reservation. Blocks never straddle the end of the area: the space up to
/// the wrap point is filled with a padding block instead.
///
/// `get_block` can fail when the oldest blocks are still reserved by slow
/// cores; the chance of that grows with the number of concurrent writers and
/// shrinks with the size of the buffer.
#[derive(Debug)]
pub struct CircularBuffer {
    region: MemoryRegion,
    reserved_tail: Vec<AtomicU64>,
    head: AtomicU64,
    tail: AtomicU64,
    buffer_length: AtomicU64,
    closed: AtomicBool,
}

impl CircularBuffer {
    /// A buffer over `arena` shared by `max_cores` cores.
    pub fn new(arena: Arena, max_cores: u32) -> Self {
        Self {
            region: MemoryRegion::new(arena, no_cache_clean),
            reserved_tail: (0..max_cores)
                .map(|_| AtomicU64::new(NO_RESERVED_TAIL))
                .collect(),
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            buffer_length: AtomicU64::new(0),
            closed: AtomicBool::new(true),
        }
    }

    /// Clean committed data from the data cache with `clean`.
    pub fn with_cache_clean(mut self, clean: CacheClean) -> Self {
        self.region.set_cache_clean(clean);
        self
    }

    /// The header followed by the block area.
    pub fn contents(&mut self) -> &[u8] {
        self.region.arena_mut().contents()
    }

    /// Length of the protocol header, 0 before initialisation.
    pub fn header_length(&self) -> usize {
        self.region.header_length()
    }

    /// Length of the block area.
    pub fn buffer_length(&self) -> u64 {
        self.buffer_length.atomic_load()
    }

    /// The (unwrapped) read and write offsets published in the header.
    pub fn offsets(&self) -> (u64, u64) {
        if self.header_length() == 0 {
            return (0, 0);
        }
        (
            self.region.param(PARAM_READ_OFFSET).atomic_load(),
            self.region.param(PARAM_WRITE_OFFSET).atomic_load(),
        )
    }

    /// Total bytes committed, including block prefixes and padding.
    pub fn total_written(&self) -> u64 {
        if self.header_length() == 0 {
            return 0;
        }
        self.region.param(PARAM_TOTAL_WRITTEN).atomic_load()
    }

    fn arena_offset(&self, offset: u64) -> usize {
        self.region
            .data_offset((offset % self.buffer_length.atomic_load()) as usize)
    }

    /// The lowest tail reserved by any core, or `tail`.
    fn reserved_tail(&self, tail: u64) -> u64 {
        self.reserved_tail
            .iter()
            .map(|r| r.atomic_load())
            .filter(|r| *r != NO_RESERVED_TAIL)
            .fold(tail, u64::min)
    }

    /// Free the block at `head`, unless that moves the head past `limit`.
    ///
    /// `head` is updated to the current head on return.
    fn free_block(&self, head: &mut u64, limit: u64) -> bool {
        let length = decode_length(
            self.region
                .prefix(self.arena_offset(*head))
                .atomic_load(),
        );
        let new_head = *head + (length + BLOCK_PREFIX) as u64;
        if new_head > limit {
            return false;
        }

        if self.head.atomic_cas_strong(head, new_head) {
            *head = new_head;
            self.region.param(PARAM_READ_OFFSET).atomic_raise_to(new_head);
        }
        true
    }

    /// Free every block before `tail`.
    fn free_to_tail(&self, tail: u64) -> bool {
        if self.reserved_tail(tail) < tail {
            return false;
        }

        let mut head = self.head.atomic_load();
        while head < tail {
            if !self.free_block(&mut head, tail) {
                return false;
            }
        }
        true
    }

    /// Free blocks until `required` bytes are available after `tail`.
    fn ensure_free(&self, tail: u64, required: u64) -> Space {
        let limit = self.reserved_tail(tail);
        let length = self.buffer_length.atomic_load();

        let mut head = self.head.atomic_load();
        loop {
            // Another core has already freed past this tail
            let used = match tail.checked_sub(head) {
                Some(used) => used,
                None => return Space::Stale,
            };
            if length - used >= required {
                return Space::Free;
            }
            if !self.free_block(&mut head, limit) {
                return Space::Full;
            }
        }
    }

    fn write_commit(&self, core: usize, arena_offset: usize, length: usize) {
        self.region.clean(arena_offset, length);
        self.region
            .param(PARAM_TOTAL_WRITTEN)
            .atomic_fetch_add(length as u64);

        self.release(core);
        self.region.clean_params();
    }

    /// Drop the reservation of `core` and publish the write offset up to the
    /// lowest tail still reserved.
    fn release(&self, core: usize) {
        self.reserved_tail[core].atomic_store(NO_RESERVED_TAIL);
        atomic::dmb();

        let new = self.reserved_tail(self.tail.atomic_load());
        self.region.param(PARAM_WRITE_OFFSET).atomic_raise_to(new);
    }
}

impl DataStore for CircularBuffer {
    fn data_store_type(&self) -> DataStoreType {
        DataStoreType::CircularRamBuffer
    }

    fn initialize(&self, header_length: usize) -> Result<(), Error> {
        if self
            .closed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(new_error(ErrorKind::StoreInit));
        }

        let buffer_length = match self
            .region
            .open(header_length, |n| n & !(BLOCK_PREFIX - 1))
        {
            Ok(n) => n,
            Err(e) => {
                self.closed.store(true, Ordering::Release);
                return Err(e);
            }
        };

        self.buffer_length.atomic_store(buffer_length as u64);
        self.head.atomic_store(0);
        self.tail.atomic_store(0);
        for r in &self.reserved_tail {
            r.atomic_store(NO_RESERVED_TAIL);
        }

        atomic::dsb();
        Ok(())
    }

    fn get_block(&self, core: u32, length: usize) -> Option<Block<'_>> {
        let aligned = align_block(length);
        let required = (aligned + BLOCK_PREFIX) as u64;
        let core = core as usize;

        if aligned == 0 || core >= self.reserved_tail.len() {
            return None;
        }
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let buffer_length = self.buffer_length.atomic_load();
        if required > buffer_length {
            return None;
        }

        let mut tail = self.tail.atomic_load();
        let reservation = &self.reserved_tail[core];
        if !reservation.atomic_cas_value(NO_RESERVED_TAIL, tail) {
            return None;
        }

        loop {
            let real_tail = tail % buffer_length;
            let until_wrap = buffer_length - real_tail;

            reservation.atomic_store(tail);

            if until_wrap < required {
                // Pad to the wrap point, committing the padding as a block
                if !self.free_to_tail(tail - real_tail) {
                    self.release(core);
                    return None;
                }

                let new_tail = tail + until_wrap;
                if !self.tail.atomic_cas_strong(&mut tail, new_tail) {
                    continue;
                }
                tail = new_tail;

                let offset = self.region.data_offset(real_tail as usize);
                let padding = until_wrap as usize;
                if padding >= BLOCK_PREFIX {
                    self.region
                        .prefix(offset)
                        .atomic_store(encode_length(padding - BLOCK_PREFIX, true));
                } else {
                    unsafe { self.region.zero(offset, padding) };
                }
                self.write_commit(core, offset, padding);
            } else {
                match self.ensure_free(tail, required) {
                    Space::Free => {}
                    Space::Full => {
                        self.release(core);
                        return None;
                    }
                    Space::Stale => {
                        tail = self.tail.atomic_load();
                        continue;
                    }
                }

                let new_tail = tail + required;
                if !self.tail.atomic_cas_strong(&mut tail, new_tail) {
                    continue;
                }

                let offset = self.region.data_offset(real_tail as usize);
                self.region
                    .prefix(offset)
                    .atomic_store(encode_length(aligned, true));
                unsafe {
                    self.region
                        .zero(offset + BLOCK_PREFIX + length, aligned - length);
                }

                let data = self.region.ptr_at(offset + BLOCK_PREFIX);
                return Some(unsafe { Block::new(NonNull::new_unchecked(data), length, offset) });
            }
        }
    }

    fn commit_block(&self, core: u32, block: Block<'_>) {
        let core = core as usize;
        if core >= self.reserved_tail.len() || self.closed.load(Ordering::Acquire) {
            return;
        }

        let offset = block.token();
        let prefix = self.region.prefix(offset);
        let length = decode_length(prefix.atomic_load());
        let required = length + BLOCK_PREFIX;
        let end = self
            .region
            .data_offset(self.buffer_length.atomic_load() as usize);

        if offset < self.header_length() || length == 0 || offset + required > end {
            return;
        }
        if self.reserved_tail[core].atomic_load() == NO_RESERVED_TAIL {
            return;
        }

        prefix.atomic_store(encode_length(length, false));
        self.write_commit(core, offset, required);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn notify_header_updated(&self, _core: u32, _timestamp: u64, header: &[u8]) {
        self.region.publish_header(header);
    }

    fn record_last_timestamp(&self, timestamp: u64) {
        self.region.raise_last_timestamp(timestamp);
    }
}
