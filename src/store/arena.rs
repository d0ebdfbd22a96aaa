use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize};

const ALIGN: usize = 8;

/// The memory backing an in-memory store.
///
/// Either allocated on the heap by [`Arena::new`] or borrowed for the life of
/// the program from a buffer the target reserves (typically a linker section
/// a debugger knows how to find) with [`Arena::from_static`]. The start is
/// always 8-byte aligned.
///
/// Concurrent access goes through the atomic word views; plain byte access is
/// only handed out for regions the caller has reserved.
#[derive(Debug)]
pub struct Arena {
    base: NonNull<u8>,
    len: usize,
    // Number of u64 words when the memory came from `new`.
    owned: Option<usize>,
}

// Shared access only happens through atomics or reserved, disjoint regions.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate `length` zeroed bytes.
    pub fn new(length: usize) -> Self {
        let words = (length + ALIGN - 1) / ALIGN;
        let memory = vec![0u64; words].into_boxed_slice();
        let base = Box::into_raw(memory) as *mut u64 as *mut u8;

        Self {
            base: NonNull::new(base).unwrap_or_else(NonNull::dangling),
            len: length,
            owned: Some(words),
        }
    }

    /// Use `buffer` for the life of the program.
    ///
    /// Leading bytes are skipped to align the start.
    pub fn from_static(buffer: &'static mut [u8]) -> Self {
        let skip = buffer.as_ptr().align_offset(ALIGN).min(buffer.len());
        let buffer = &mut buffer[skip..];

        Self {
            base: NonNull::new(buffer.as_mut_ptr()).unwrap_or_else(NonNull::dangling),
            len: buffer.len(),
            owned: None,
        }
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the arena has no usable bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The address of the first byte.
    pub fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Pointer to the byte at `offset`.
    pub(crate) fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// The whole arena. Exclusive access guarantees no writer is active.
    pub fn contents(&mut self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// # Safety
    ///
    /// `offset` must be 4-byte aligned and `offset + 4 <= len`.
    pub(crate) unsafe fn word_u32(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.len);
        &*(self.ptr_at(offset) as *const AtomicU32)
    }

    /// # Safety
    ///
    /// `offset` must be 8-byte aligned and `offset + 8 <= len`.
    pub(crate) unsafe fn word_u64(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % 8 == 0 && offset + 8 <= self.len);
        &*(self.ptr_at(offset) as *const AtomicU64)
    }

    /// # Safety
    ///
    /// `offset` must be usize aligned and in bounds.
    pub(crate) unsafe fn word_usize(&self, offset: usize) -> &AtomicUsize {
        debug_assert!(offset % std::mem::size_of::<usize>() == 0);
        debug_assert!(offset + std::mem::size_of::<usize>() <= self.len);
        &*(self.ptr_at(offset) as *const AtomicUsize)
    }

    /// Zero `length` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must own the region.
    pub(crate) unsafe fn zero(&self, offset: usize, length: usize) {
        debug_assert!(offset + length <= self.len);
        std::ptr::write_bytes(self.ptr_at(offset), 0, length);
    }

    /// Copy `data` to `offset`.
    ///
    /// # Safety
    ///
    /// The caller must own the region.
    pub(crate) unsafe fn write(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr_at(offset), data.len());
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Some(words) = self.owned {
            unsafe {
                let slice = std::ptr::slice_from_raw_parts_mut(self.base.as_ptr() as *mut u64, words);
                drop(Box::from_raw(slice));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::AtomicInt;

    #[test]
    fn test_heap_arena_is_zeroed_and_aligned() {
        let mut a = Arena::new(21);
        assert_eq!(a.len(), 21);
        assert_eq!(a.as_ptr() as usize % ALIGN, 0);
        assert!(a.contents().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_static_arena_aligns_start() {
        let buffer: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
        let unaligned = &mut buffer[1..];
        let a = Arena::from_static(unaligned);
        assert_eq!(a.as_ptr() as usize % ALIGN, 0);
        assert!(a.len() <= 63 && a.len() >= 56);
    }

    #[test]
    fn test_word_views() {
        let mut a = Arena::new(16);
        unsafe {
            a.word_u32(4).atomic_store(0xdead_beef);
            a.word_u64(8).atomic_store(0x0102_0304_0506_0708);
        }

        let c = a.contents();
        assert_eq!(&c[4..8], &0xdead_beefu32.to_ne_bytes());
        assert_eq!(&c[8..16], &0x0102_0304_0506_0708u64.to_ne_bytes());
    }

    #[test]
    fn test_write_and_zero() {
        let mut a = Arena::new(8);
        unsafe {
            a.write(2, &[1, 2, 3]);
        }
        assert_eq!(a.contents(), &[0, 0, 1, 2, 3, 0, 0, 0]);

        unsafe { a.zero(3, 2) };
        assert_eq!(a.contents(), &[0, 0, 1, 0, 0, 0, 0, 0]);
    }
}
