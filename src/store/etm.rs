use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::Error;

use super::streaming::StreamingBackend;
use super::DataStoreType;

const INDEX_LENGTH: usize = 256 + 4;
const MAX_FRAME: usize = 1 << 16;

/// A table whose store addresses, seen through ETM data address trace,
/// encode a frame.
///
/// Writing byte `d` stores to entry `d`, so a trace of store addresses
/// relative to the table recovers the data without tracing values.
#[repr(C, align(256))]
pub struct WriteIndex([AtomicU8; INDEX_LENGTH]);

impl WriteIndex {
    /// A zeroed table.
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU8 = AtomicU8::new(0);
        Self([ZERO; INDEX_LENGTH])
    }

    #[inline]
    fn put(&self, index: usize, value: u8) {
        self.0[index].store(value, Ordering::Relaxed);
    }

    /// The value last stored at `index`.
    pub fn get(&self, index: usize) -> u8 {
        self.0[index].load(Ordering::Relaxed)
    }

    /// Encode `data` as a sequence of stores. Frames over 64 KiB are dropped.
    ///
    /// The length is written as two bytes before and after the data, each
    /// followed by a store at the entry named by that byte so the decoder can
    /// tell the four apart.
    pub fn write_frame(&self, data: &[u8]) {
        if data.len() > MAX_FRAME {
            return;
        }

        let low = data.len() as u8;
        let high = (data.len() >> 8) as u8;

        self.put(256, low);
        self.put(low as usize, 0);
        self.put(257, high);
        self.put(high as usize, 1);

        for d in data {
            self.put(*d as usize, *d);
        }

        self.put(258, low);
        self.put(low as usize, 2);
        self.put(259, high);
        self.put(high as usize, 3);
    }
}

impl Default for WriteIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WriteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteIndex").finish()
    }
}

/// The table traced by the host, exported under a fixed symbol name.
#[export_name = "barman_write_index"]
pub static WRITE_INDEX: WriteIndex = WriteIndex::new();

/// Frames sent through ETM data address trace of [`WRITE_INDEX`].
///
/// The trace identifies the writing core, so each core has its own bank with
/// a single channel.
#[derive(Debug)]
pub struct Etm {
    cores: u32,
    index: &'static WriteIndex,
}

impl Etm {
    /// A backend for `max_cores` cores writing to [`WRITE_INDEX`].
    pub fn new(max_cores: u32) -> Self {
        Self::with_index(max_cores, &WRITE_INDEX)
    }

    /// A backend writing to `index`.
    pub fn with_index(max_cores: u32, index: &'static WriteIndex) -> Self {
        Self {
            cores: max_cores,
            index,
        }
    }
}

impl StreamingBackend for Etm {
    fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    fn write_frame(&self, data: &[u8], _channel: u16, _flush: bool) {
        self.index.write_frame(data);
    }

    fn channels(&self) -> u16 {
        1
    }

    fn banks(&self) -> u32 {
        self.cores
    }

    fn bank(&self, core: u32) -> u32 {
        core
    }

    fn data_store_type(&self) -> DataStoreType {
        DataStoreType::Etm
    }
}
