#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use barman::platform::Platform;
use barman::store::{decode_length, is_padding, BlockLength, BLOCK_PREFIX};
use barman::ClockInfo;

/// A Cortex-A55, matched by the families registered in the tests.
pub const MIDR: u32 = 0x410f_d050;

pub const USZ: usize = std::mem::size_of::<usize>();

const PARAMS_LENGTH: usize = 40;
const PARAM_BUFFER_LENGTH: usize = 0;
const PARAM_WRITE_OFFSET: usize = 8;
const PARAM_READ_OFFSET: usize = 16;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A platform whose clock, core and task are set by the test.
#[derive(Debug)]
pub struct TestPlatform {
    now: AtomicU64,
    core: AtomicU32,
    task: AtomicU32,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            core: AtomicU32::new(0),
            task: AtomicU32::new(1),
        }
    }

    pub fn set_time(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn set_core(&self, core: u32) {
        self.core.store(core, Ordering::SeqCst);
    }

    pub fn set_task(&self, task: u32) {
        self.task.store(task, Ordering::SeqCst);
    }
}

impl Platform for TestPlatform {
    fn timestamp(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn midr(&self) -> u32 {
        MIDR
    }

    fn mpidr(&self) -> usize {
        self.core.load(Ordering::SeqCst) as usize
    }

    fn map_mpidr_to_core_no(&self, mpidr: usize) -> u32 {
        mpidr as u32
    }

    fn core_no(&self) -> u32 {
        self.core.load(Ordering::SeqCst)
    }

    fn current_task_id(&self) -> u32 {
        self.task.load(Ordering::SeqCst)
    }
}

pub fn clock() -> ClockInfo {
    ClockInfo {
        timestamp_base: 0,
        timestamp_multiplier: 1,
        timestamp_divisor: 1,
        unix_base_ns: 1_600_000_000_000_000_000,
    }
}

pub fn u32_at(b: &[u8], at: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[at..at + 4]);
    u32::from_ne_bytes(w)
}

pub fn u64_at(b: &[u8], at: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&b[at..at + 8]);
    u64::from_ne_bytes(w)
}

pub fn usize_at(b: &[u8], at: usize) -> usize {
    let mut w = [0u8; USZ];
    w.copy_from_slice(&b[at..at + USZ]);
    usize::from_ne_bytes(w)
}

/// Read access to a header image.
pub struct Header<'a>(pub &'a [u8]);

impl<'a> Header<'a> {
    pub fn magic(&self) -> u64 {
        u64_at(self.0, 0)
    }

    pub fn length(&self) -> usize {
        u32_at(self.0, 12) as usize
    }

    pub fn data_store_type(&self) -> u32 {
        u32_at(self.0, 16)
    }

    pub fn last_timestamp(&self) -> u64 {
        u64_at(self.0, 24)
    }

    pub fn max_task_infos(&self) -> u32 {
        u32_at(self.0, 40)
    }

    /// The NUL terminated string at `offset` in the string table.
    pub fn string(&self, offset: u32) -> String {
        let start = 96 + offset as usize;
        let end = self.0[start..]
            .iter()
            .position(|b| *b == 0)
            .map_or(self.0.len(), |n| start + n);
        String::from_utf8_lossy(&self.0[start..end]).into_owned()
    }

    pub fn target_name(&self) -> String {
        self.string(u32_at(self.0, 20))
    }

    pub fn param(&self, index: usize) -> u64 {
        u64_at(self.0, self.length() - PARAMS_LENGTH + index)
    }
}

/// A decoded record: the common fields and everything after them.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: u32,
    pub core: u32,
    pub timestamp: u64,
    pub body: Vec<u8>,
}

impl Record {
    pub fn parse(block: &[u8]) -> Self {
        Self {
            kind: u32_at(block, 0),
            core: u32_at(block, 4),
            timestamp: u64_at(block, 8),
            body: block[16..].to_vec(),
        }
    }
}

fn walk(contents: &[u8], start: usize, mut read: u64, write: u64, wrap: Option<u64>) -> Vec<Record> {
    let mut out = Vec::new();
    while read < write {
        let at = start + wrap.map_or(read, |w| read % w) as usize;
        let mut bytes = [0u8; BLOCK_PREFIX];
        bytes.copy_from_slice(&contents[at..at + BLOCK_PREFIX]);
        let prefix = BlockLength::from_ne_bytes(bytes);
        let n = decode_length(prefix);

        // Padding up to the wrap point may be an empty block
        if !is_padding(prefix) {
            assert!(n > 0, "empty block at {}", read);
            out.push(Record::parse(&contents[at + BLOCK_PREFIX..at + BLOCK_PREFIX + n]));
        }
        read += (n + BLOCK_PREFIX) as u64;
    }
    out
}

/// The committed records of a linear buffer.
pub fn linear_records(contents: &[u8]) -> Vec<Record> {
    let header = Header(contents);
    let write = header.param(PARAM_WRITE_OFFSET);
    walk(contents, header.length(), 0, write, None)
}

/// The records still held by a circular buffer, oldest first.
pub fn circular_records(contents: &[u8]) -> Vec<Record> {
    let header = Header(contents);
    let length = header.param(PARAM_BUFFER_LENGTH);
    let read = header.param(PARAM_READ_OFFSET);
    let write = header.param(PARAM_WRITE_OFFSET);
    walk(contents, header.length(), read, write, Some(length))
}
