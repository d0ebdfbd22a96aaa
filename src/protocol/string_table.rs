use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::atomic::AtomicInt;

/// Longest target name stored in the header.
pub(crate) const MAX_TARGET_NAME: u32 = 255;

/// Longest task name stored in the header.
pub(crate) const MAX_TASK_NAME: u32 = 31;

/// The append-only table of NUL terminated strings in the protocol header.
///
/// Strings are referenced by offset. An insert first looks for the string
/// (with its terminator) anywhere in the table, which also finds it as the
/// tail of a longer string. When the table fills, the string is truncated to
/// what still fits, or to the longest prefix already present.
#[derive(Debug)]
pub(crate) struct StringTable {
    length: AtomicU32,
    bytes: Box<[AtomicU8]>,
}

impl StringTable {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            length: AtomicU32::new(0),
            bytes: (0..capacity.max(1)).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Bytes in use, including terminators.
    pub(crate) fn len(&self) -> u32 {
        self.length.atomic_load()
    }

    /// Empty the table.
    ///
    /// Only valid while nothing else can insert.
    pub(crate) fn clear(&self) {
        self.bytes.iter().for_each(|b| b.store(0, Ordering::Relaxed));
        self.length.atomic_store(0);
    }

    #[inline]
    fn byte(&self, offset: u32) -> u8 {
        self.bytes[offset as usize].load(Ordering::Relaxed)
    }

    /// The string at `offset`, without its terminator.
    pub(crate) fn get(&self, offset: u32) -> Vec<u8> {
        (offset..self.capacity())
            .map(|i| self.byte(i))
            .take_while(|b| *b != 0)
            .collect()
    }

    /// Copy the whole table (all `capacity` bytes) into `out`.
    pub(crate) fn copy_to(&self, out: &mut [u8]) {
        for (o, b) in out.iter_mut().zip(self.bytes.iter()) {
            *o = b.load(Ordering::Relaxed);
        }
    }

    /// Insert `string`, truncated to `max_length` bytes, and return its
    /// offset.
    pub(crate) fn insert(&self, string: &str, max_length: u32) -> u32 {
        let capacity = self.capacity();
        let mut string = string.as_bytes();

        // Stop at an embedded NUL, as the table could not represent it
        if let Some(nul) = string.iter().position(|b| *b == 0) {
            string = &string[..nul];
        }

        let mut string_length = string.len().min(u32::MAX as usize) as u32;
        if string_length > max_length {
            warn!(
                "Truncating to {} characters: {}",
                max_length,
                String::from_utf8_lossy(string)
            );
            string_length = max_length;
        }

        let mut table_length = self.length.atomic_load();
        let mut table_full = false;

        loop {
            let (found, longest_match) = self.find(string, string_length, table_length);
            if let Some(offset) = found {
                return offset;
            }

            if table_length as u64 + string_length as u64 + 1 > capacity as u64 {
                if string_length == 0 || table_length > capacity {
                    error!("string table corrupted, no terminator");
                    self.bytes[capacity as usize - 1].store(0, Ordering::Relaxed);
                    self.length.atomic_store(capacity);
                    return capacity - 1;
                }

                let available = capacity.saturating_sub(table_length).saturating_sub(1);
                let restart_length = if string_length > longest_match {
                    longest_match
                } else {
                    longest_match - 1
                };

                string_length = available.max(restart_length);
                table_full = true;
                if string_length == 0 {
                    string = &string[..0];
                }
                continue;
            }

            let end = table_length + string_length + 1;
            let start = table_length;
            if self.length.atomic_cas_strong(&mut table_length, end) {
                for (i, b) in string[..string_length as usize].iter().enumerate() {
                    self.bytes[start as usize + i].store(*b, Ordering::Relaxed);
                }
                self.bytes[(start + string_length) as usize].store(0, Ordering::Release);

                if table_full {
                    warn!(
                        "String table full, truncating to {} characters: {}",
                        string_length,
                        String::from_utf8_lossy(&string[..string_length as usize])
                    );
                }

                return start;
            }
        }
    }

    /// Search `[0, table_length)` for the first `string_length` bytes of
    /// `string` followed by a NUL.
    ///
    /// Also returns the longest partial match seen, used when the table is
    /// too full to append the whole string.
    fn find(&self, string: &[u8], string_length: u32, table_length: u32) -> (Option<u32>, u32) {
        let first = string.first().copied().unwrap_or(0);
        let mut longest_match = 0;
        let mut table_offset = 0;

        while table_offset < table_length {
            let mut restart_offset = table_offset + 1;
            let mut failed = false;

            for string_offset in 0..=string_length {
                let c = if string_offset < string_length {
                    string[string_offset as usize]
                } else {
                    0
                };

                let at = table_offset + string_offset;
                if at >= table_length || self.byte(at) != c {
                    failed = true;
                    break;
                }

                longest_match = longest_match.max(string_offset + 1);

                // The next place the string could start
                if string_offset > 0 && restart_offset == table_offset + 1 && c == first {
                    restart_offset = at;
                }
            }

            if !failed {
                return (Some(table_offset), longest_match);
            }
            table_offset = restart_offset;
        }

        (None, longest_match)
    }
}
