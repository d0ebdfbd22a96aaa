use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::atomic::{self, AtomicInt};
use crate::error::{new_error, Error, ErrorKind};
use crate::platform::{no_cache_clean, CacheClean};

use super::memory::MemoryRegion;
use super::{
    align_block, decode_length, encode_length, Arena, Block, DataStore, DataStoreType,
    BLOCK_PREFIX, PARAM_TOTAL_WRITTEN, PARAM_WRITE_OFFSET,
};

// Marks a core that is between claiming its slot and reserving space.
const CORE_BUSY: usize = !0;

/// A buffer that fills once and then rejects every further block.
///
/// Blocks are reserved by moving a shared write offset forward with
/// compare-and-swap. The header's write offset only moves on commit, so a
/// reader that stops the target sees committed blocks up to it.
#[derive(Debug)]
pub struct LinearBuffer {
    region: MemoryRegion,
    // Per core: 0 when idle, otherwise the end offset of the open block
    committed: Vec<AtomicUsize>,
    write_offset: AtomicUsize,
    buffer_length: AtomicUsize,
    closed: AtomicBool,
    full: AtomicBool,
}

impl LinearBuffer {
    /// A buffer over `arena` shared by `max_cores` cores.
    pub fn new(arena: Arena, max_cores: u32) -> Self {
        Self {
            region: MemoryRegion::new(arena, no_cache_clean),
            committed: (0..max_cores).map(|_| AtomicUsize::new(0)).collect(),
            write_offset: AtomicUsize::new(0),
            buffer_length: AtomicUsize::new(0),
            closed: AtomicBool::new(true),
            full: AtomicBool::new(false),
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

    /// True once a block has been refused for lack of space.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// The write offset published in the header.
    pub fn committed_offset(&self) -> u64 {
        if self.header_length() == 0 {
            return 0;
        }
        self.region.param(PARAM_WRITE_OFFSET).atomic_load()
    }

    /// Total bytes committed, including block prefixes.
    pub fn total_written(&self) -> u64 {
        if self.header_length() == 0 {
            return 0;
        }
        self.region.param(PARAM_TOTAL_WRITTEN).atomic_load()
    }
}

impl DataStore for LinearBuffer {
    fn data_store_type(&self) -> DataStoreType {
        DataStoreType::LinearRamBuffer
    }

    fn initialize(&self, header_length: usize) -> Result<(), Error> {
        if self
            .closed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(new_error(ErrorKind::StoreInit));
        }

        let buffer_length = match self.region.open(header_length, |n| n) {
            Ok(n) => n,
            Err(e) => {
                self.closed.store(true, Ordering::Release);
                return Err(e);
            }
        };

        self.buffer_length.atomic_store(buffer_length);
        self.write_offset.atomic_store(0);
        for c in &self.committed {
            c.atomic_store(0);
        }
        self.full.store(false, Ordering::Release);

        atomic::dsb();
        Ok(())
    }

    fn get_block(&self, core: u32, length: usize) -> Option<Block<'_>> {
        let aligned = align_block(length);
        let required = aligned + BLOCK_PREFIX;

        if aligned == 0 {
            return None;
        }
        let slot = self.committed.get(core as usize)?;
        if self.closed.load(Ordering::Acquire) || self.full.load(Ordering::Acquire) {
            return None;
        }

        // One open block per core
        if !slot.atomic_cas_value(0, CORE_BUSY) {
            return None;
        }

        // The offset never moves past the end, so no reservation is undone
        let buffer_length = self.buffer_length.atomic_load();
        let mut old = self.write_offset.atomic_load();
        let mut new;
        loop {
            new = old + required;
            if new > buffer_length {
                if !self.full.swap(true, Ordering::AcqRel) {
                    warn!("linear buffer full after {} bytes", old);
                }
                slot.atomic_store(0);
                return None;
            }
            if self.write_offset.atomic_cas_weak(&mut old, new) {
                break;
            }
        }

        let offset = self.region.data_offset(old);
        self.region
            .prefix(offset)
            .atomic_store(encode_length(aligned, true));
        unsafe {
            self.region
                .zero(offset + BLOCK_PREFIX + length, aligned - length);
        }
        slot.atomic_store(new);

        let data = self.region.ptr_at(offset + BLOCK_PREFIX);
        Some(unsafe { Block::new(std::ptr::NonNull::new_unchecked(data), length, offset) })
    }

    fn commit_block(&self, core: u32, block: Block<'_>) {
        let slot = match self.committed.get(core as usize) {
            Some(s) => s,
            None => return,
        };
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let offset = block.token();
        let new_write_offset = slot.atomic_load();
        if new_write_offset == 0 || new_write_offset == CORE_BUSY {
            return;
        }

        let prefix = self.region.prefix(offset);
        let length = decode_length(prefix.atomic_load());
        let required = length + BLOCK_PREFIX;
        let end = self.region.data_offset(self.write_offset.atomic_load());
        if length == 0 || offset < self.header_length() || offset + required > end {
            return;
        }

        prefix.atomic_store(encode_length(length, false));
        self.region.clean(offset, required);

        self.region
            .param(PARAM_TOTAL_WRITTEN)
            .atomic_fetch_add(required as u64);
        self.region
            .param(PARAM_WRITE_OFFSET)
            .atomic_raise_to(new_write_offset as u64);
        self.region.clean_params();

        slot.atomic_store(0);
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
