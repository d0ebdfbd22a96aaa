//! Data stores: where encoded records end up.
//!
//! A store hands out [`Block`]s for the protocol layer to fill and then takes
//! them back through [`DataStore::commit_block`]. Each core may hold at most
//! one uncommitted block at a time.
//!
//! The in-memory stores ([`LinearBuffer`] and [`CircularBuffer`]) keep the
//! protocol header at the start of their [`Arena`] and the records after it,
//! so a debugger can read the whole capture from memory. The streaming store
//! ([`StreamingStore`]) sends each record as a frame over a trace port
//! ([`Itm`], [`Stm`], [`Etm`] or a user supplied [`StreamingBackend`]).

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::error::Error;

mod arena;
mod circular;
mod etm;
mod itm;
mod linear;
mod memory;
mod mmio;
mod stm;
mod streaming;

pub use self::arena::Arena;
pub use self::circular::CircularBuffer;
pub use self::etm::{Etm, WriteIndex, WRITE_INDEX};
pub use self::itm::{Itm, ItmConfig};
pub use self::linear::LinearBuffer;
pub use self::stm::{Stm, StmConfig};
pub use self::streaming::{
    write_frame, Stimulus, StreamingBackend, StreamingStore, STREAMING_BUFFER_SIZE,
};

/// The length prefix in front of every in-memory block.
pub type BlockLength = usize;

/// Size of the [`BlockLength`] prefix.
pub const BLOCK_PREFIX: usize = std::mem::size_of::<BlockLength>();

/// Set in a block's length prefix while the block is uncommitted, or when it
/// only pads the buffer up to its wrap point.
pub const PADDING_FLAG: BlockLength = 1 << (BLOCK_PREFIX * 8 - 1);

/// Encode a length prefix.
#[inline]
pub fn encode_length(length: usize, padding: bool) -> BlockLength {
    if padding {
        length | PADDING_FLAG
    } else {
        length & !PADDING_FLAG
    }
}

/// The length held in a prefix, without the padding flag.
#[inline]
pub fn decode_length(prefix: BlockLength) -> usize {
    prefix & !PADDING_FLAG
}

/// Whether a prefix has the padding flag set.
#[inline]
pub fn is_padding(prefix: BlockLength) -> bool {
    prefix & PADDING_FLAG != 0
}

/// Round `length` up to a multiple of [`BLOCK_PREFIX`].
#[inline]
pub(crate) fn align_block(length: usize) -> usize {
    (length + BLOCK_PREFIX - 1) & !(BLOCK_PREFIX - 1)
}

/// Length of the data store parameters at the end of the protocol header.
pub const HEADER_PARAMS_LENGTH: usize = 40;

// Offsets within the data store parameters.
pub(crate) const PARAM_BUFFER_LENGTH: usize = 0;
pub(crate) const PARAM_WRITE_OFFSET: usize = 8;
pub(crate) const PARAM_READ_OFFSET: usize = 16;
pub(crate) const PARAM_TOTAL_WRITTEN: usize = 24;
pub(crate) const PARAM_BASE_POINTER: usize = 32;

/// Identifies the kind of store in the protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataStoreType {
    /// A user supplied in-memory store.
    User = 0,
    /// [`LinearBuffer`]
    LinearRamBuffer = 1,
    /// [`CircularBuffer`]
    CircularRamBuffer = 2,
    /// [`Stm`]
    Stm = 3,
    /// A user supplied [`StreamingBackend`].
    StreamingUser = 4,
    /// [`Itm`]
    Itm = 5,
    /// [`Etm`]
    Etm = 6,
}

impl DataStoreType {
    /// True for stores that keep the header and records in target memory.
    pub fn is_in_memory(self) -> bool {
        match self {
            DataStoreType::User
            | DataStoreType::LinearRamBuffer
            | DataStoreType::CircularRamBuffer => true,
            _ => false,
        }
    }
}

/// A reserved, not yet committed, region of a store.
///
/// Obtained from [`DataStore::get_block`] and handed back to
/// [`DataStore::commit_block`] on the same core.
#[derive(Debug)]
pub struct Block<'a> {
    data: NonNull<u8>,
    len: usize,
    token: usize,
    _store: PhantomData<&'a mut [u8]>,
}

impl<'a> Block<'a> {
    /// Wrap `len` bytes at `data`.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the region for `'a`.
    pub unsafe fn new(data: NonNull<u8>, len: usize, token: usize) -> Self {
        Self {
            data,
            len,
            token,
            _store: PhantomData,
        }
    }

    /// A store specific value recorded by `get_block`, such as the offset of
    /// the block or the index of its buffer.
    pub fn token(&self) -> usize {
        self.token
    }
}

impl<'a> Deref for Block<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl<'a> DerefMut for Block<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

/// A destination for protocol data.
///
/// Every method may be called concurrently from any core; none may block.
pub trait DataStore: Sync {
    /// The type recorded in the protocol header.
    fn data_store_type(&self) -> DataStoreType;

    /// Open the store for a protocol header of `header_length` bytes.
    ///
    /// Fails if the store is already open or cannot hold the header.
    fn initialize(&self, header_length: usize) -> Result<(), Error>;

    /// Reserve `length` bytes for `core`.
    ///
    /// Returns `None` when the store is closed, full or `core` already holds
    /// a block.
    fn get_block(&self, core: u32, length: usize) -> Option<Block<'_>>;

    /// Publish a block previously returned to `core`.
    fn commit_block(&self, core: u32, block: Block<'_>);

    /// Close the store. Blocks still outstanding are dropped on commit.
    fn close(&self);

    /// The protocol header changed; `header` is its current image.
    fn notify_header_updated(&self, _core: u32, _timestamp: u64, _header: &[u8]) {}

    /// The header's last timestamp was raised to `timestamp`.
    fn record_last_timestamp(&self, _timestamp: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_encoding() {
        let prefix = encode_length(24, true);
        assert!(is_padding(prefix));
        assert_eq!(decode_length(prefix), 24);

        let prefix = encode_length(prefix, false);
        assert!(!is_padding(prefix));
        assert_eq!(decode_length(prefix), 24);
    }

    #[test]
    fn test_align_block() {
        assert_eq!(align_block(0), 0);
        assert_eq!(align_block(1), BLOCK_PREFIX);
        assert_eq!(align_block(BLOCK_PREFIX), BLOCK_PREFIX);
        assert_eq!(align_block(BLOCK_PREFIX + 1), 2 * BLOCK_PREFIX);
    }

    #[test]
    fn test_in_memory_types() {
        assert!(DataStoreType::LinearRamBuffer.is_in_memory());
        assert!(DataStoreType::CircularRamBuffer.is_in_memory());
        assert!(!DataStoreType::Itm.is_in_memory());
        assert_eq!(DataStoreType::Etm as u32, 6);
    }
}
