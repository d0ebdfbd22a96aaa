use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::atomic::AtomicInt;
use crate::error::{new_error, Error, ErrorKind};

use super::{decode_length, Block, BlockLength, DataStore, DataStoreType, BLOCK_PREFIX};

/// Size of each scratch buffer, including the length prefix.
pub const STREAMING_BUFFER_SIZE: usize = 0x100;

const STATUS_CLOSED: u32 = 0;
const STATUS_OPEN: u32 = 1;
const STATUS_CHANGING: u32 = 2;

/// A trace port that carries framed data to the host.
///
/// Frames are written on numbered channels. Channels are grouped in banks;
/// a core only ever uses the channels of its own bank so that frames from
/// different cores never interleave on one channel.
pub trait StreamingBackend: Sync {
    /// Prepare the port. Called once when the store is opened.
    fn init(&self) -> Result<(), Error>;

    /// Write one frame. With `flush` the end of the frame is marked
    /// immediately instead of by the start of the next frame.
    fn write_frame(&self, data: &[u8], channel: u16, flush: bool);

    /// Shut the port down.
    fn close(&self) {}

    /// Number of channels in each bank.
    fn channels(&self) -> u16;

    /// Number of banks.
    fn banks(&self) -> u32 {
        1
    }

    /// The bank used by `core`.
    fn bank(&self, _core: u32) -> u32 {
        0
    }

    /// The type recorded in the protocol header.
    fn data_store_type(&self) -> DataStoreType {
        DataStoreType::StreamingUser
    }
}

/// Receives the pieces of a frame from [`write_frame`].
pub trait Stimulus {
    /// A frame boundary.
    fn marker(&mut self);

    /// A single byte.
    fn byte(&mut self, value: u8);

    /// Four bytes, little endian.
    fn word(&mut self, value: u32);
}

/// Split `data` into stimulus writes.
///
/// Bytes are written one at a time up to the first 4-byte aligned address,
/// then as words, then the trailing bytes. The frame starts with a marker,
/// and ends with one when `flush` is set.
pub fn write_frame<S: Stimulus + ?Sized>(sink: &mut S, data: &[u8], flush: bool) {
    let head = data.as_ptr().align_offset(4).min(data.len());
    let (start, rest) = data.split_at(head);
    let (words, end) = rest.split_at(rest.len() & !3);

    sink.marker();

    for b in start {
        sink.byte(*b);
    }

    for w in words.chunks_exact(4) {
        sink.word(u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
    }

    for b in end {
        sink.byte(*b);
    }

    if flush {
        sink.marker();
    }
}

#[repr(C, align(16))]
struct ScratchBuffer(UnsafeCell<[u8; STREAMING_BUFFER_SIZE]>);

// Each buffer is only touched by the holder of its busy flag.
unsafe impl Sync for ScratchBuffer {}

/// A store that sends every committed block straight to a trace port.
///
/// Blocks are assembled in a small scratch buffer per channel and written as
/// one frame on commit. Header updates are sent as a flushed frame.
pub struct StreamingStore<B> {
    backend: B,
    status: AtomicU32,
    busy: Vec<AtomicBool>,
    buffers: Vec<ScratchBuffer>,
}

impl<B: StreamingBackend> StreamingStore<B> {
    /// A store writing to `backend`.
    pub fn new(backend: B) -> Self {
        let n = backend.banks() as usize * backend.channels() as usize;

        Self {
            backend,
            status: AtomicU32::new(STATUS_CLOSED),
            busy: (0..n).map(|_| AtomicBool::new(false)).collect(),
            buffers: (0..n)
                .map(|_| ScratchBuffer(UnsafeCell::new([0; STREAMING_BUFFER_SIZE])))
                .collect(),
        }
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn channels(&self) -> usize {
        self.backend.channels() as usize
    }

    /// Claim a free buffer in the bank of `core`.
    fn get_a_buffer(&self, core: u32) -> Option<usize> {
        let start = self.backend.bank(core) as usize * self.channels();
        if start >= self.buffers.len() {
            error!("streaming bank for core {} out of range", core);
            return None;
        }

        (start..start + self.channels()).find(|n| {
            self.busy[*n]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    fn return_buffer(&self, buffer_no: usize) {
        self.busy[buffer_no].store(false, Ordering::Release);
    }

    fn channel_of(&self, buffer_no: usize) -> u16 {
        (buffer_no % self.channels()) as u16
    }
}

impl<B: StreamingBackend> DataStore for StreamingStore<B> {
    fn data_store_type(&self) -> DataStoreType {
        self.backend.data_store_type()
    }

    fn initialize(&self, _header_length: usize) -> Result<(), Error> {
        if !self.status.atomic_cas_value(STATUS_CLOSED, STATUS_CHANGING) {
            return Err(new_error(ErrorKind::StoreInit));
        }
        if self.buffers.is_empty() {
            self.status.atomic_store(STATUS_CLOSED);
            return Err(new_error(ErrorKind::StoreInit));
        }

        match self.backend.init() {
            Ok(()) => {
                self.status.atomic_store(STATUS_OPEN);
                Ok(())
            }
            Err(e) => {
                self.status.atomic_store(STATUS_CLOSED);
                Err(e)
            }
        }
    }

    fn get_block(&self, core: u32, length: usize) -> Option<Block<'_>> {
        if length == 0 || length + BLOCK_PREFIX > STREAMING_BUFFER_SIZE {
            return None;
        }
        if self.status.atomic_load() != STATUS_OPEN {
            return None;
        }

        let buffer_no = self.get_a_buffer(core)?;
        let buffer = self.buffers[buffer_no].0.get() as *mut u8;
        unsafe {
            (buffer as *mut BlockLength).write(length);
            let data = NonNull::new_unchecked(buffer.add(BLOCK_PREFIX));
            Some(Block::new(data, length, buffer_no))
        }
    }

    fn commit_block(&self, core: u32, block: Block<'_>) {
        let buffer_no = block.token();
        if buffer_no >= self.buffers.len()
            || buffer_no / self.channels() != self.backend.bank(core) as usize
            || !self.busy[buffer_no].load(Ordering::Acquire)
        {
            return;
        }

        if self.status.atomic_load() == STATUS_OPEN {
            let buffer = self.buffers[buffer_no].0.get() as *const u8;
            let length = decode_length(unsafe { (buffer as *const BlockLength).read() });

            if length != 0 && length + BLOCK_PREFIX <= STREAMING_BUFFER_SIZE {
                let data = unsafe { std::slice::from_raw_parts(buffer.add(BLOCK_PREFIX), length) };
                self.backend
                    .write_frame(data, self.channel_of(buffer_no), false);
            }
        }

        self.return_buffer(buffer_no);
    }

    fn close(&self) {
        self.status.atomic_store(STATUS_CHANGING);
        self.backend.close();
        self.status.atomic_store(STATUS_CLOSED);
    }

    fn notify_header_updated(&self, core: u32, _timestamp: u64, header: &[u8]) {
        // Only the channel is needed, not the buffer
        if let Some(buffer_no) = self.get_a_buffer(core) {
            self.backend
                .write_frame(header, self.channel_of(buffer_no), true);
            self.return_buffer(buffer_no);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Write {
        Marker,
        Byte(u8),
        Word(u32),
    }

    #[derive(Default)]
    struct Recorder(Vec<Write>);

    impl Stimulus for Recorder {
        fn marker(&mut self) {
            self.0.push(Write::Marker);
        }
        fn byte(&mut self, value: u8) {
            self.0.push(Write::Byte(value));
        }
        fn word(&mut self, value: u32) {
            self.0.push(Write::Word(value));
        }
    }

    #[repr(align(4))]
    struct Aligned([u8; 12]);

    #[test]
    fn test_packetise_unaligned_start() {
        let data = Aligned([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        let mut r = Recorder::default();
        write_frame(&mut r, &data.0[1..10], true);

        assert_eq!(
            r.0,
            vec![
                Write::Marker,
                Write::Byte(1),
                Write::Byte(2),
                Write::Byte(3),
                Write::Word(0x0706_0504),
                Write::Byte(8),
                Write::Byte(9),
                Write::Marker,
            ]
        );
    }

    #[test]
    fn test_packetise_aligned_no_flush() {
        let data = Aligned([1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]);
        let mut r = Recorder::default();
        write_frame(&mut r, &data.0[..8], false);

        assert_eq!(r.0, vec![Write::Marker, Write::Word(1), Write::Word(2)]);
    }

    #[test]
    fn test_packetise_short_frame() {
        // Shorter than the distance to the next word boundary
        let data = Aligned([0, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut r = Recorder::default();
        write_frame(&mut r, &data.0[1..3], false);

        assert_eq!(r.0, vec![Write::Marker, Write::Byte(7), Write::Byte(8)]);
    }

    // Records frames per channel.
    struct Capture {
        banks: u32,
        fail: bool,
        frames: Mutex<Vec<(u16, Vec<u8>, bool)>>,
        closed: AtomicBool,
    }

    impl Capture {
        fn new(banks: u32) -> Self {
            Self {
                banks,
                fail: false,
                frames: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }
        }
    }

    impl StreamingBackend for Capture {
        fn init(&self) -> Result<(), Error> {
            if self.fail {
                return Err(new_error(ErrorKind::StoreInit));
            }
            Ok(())
        }

        fn write_frame(&self, data: &[u8], channel: u16, flush: bool) {
            self.frames
                .lock()
                .expect("poisoned")
                .push((channel, data.to_vec(), flush));
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn channels(&self) -> u16 {
            2
        }

        fn banks(&self) -> u32 {
            self.banks
        }

        fn bank(&self, core: u32) -> u32 {
            core
        }
    }

    #[test]
    fn test_closed_until_initialized() {
        let store = StreamingStore::new(Capture::new(1));
        assert!(store.get_block(0, 4).is_none());

        store.initialize(0).expect("initialize");
        assert!(store.get_block(0, 4).is_some());

        let err = store.initialize(0).expect_err("opened twice");
        assert_eq!(err.kind(), &ErrorKind::StoreInit);
    }

    #[test]
    fn test_backend_init_failure_closes() {
        let mut backend = Capture::new(1);
        backend.fail = true;
        let store = StreamingStore::new(backend);

        assert!(store.initialize(0).is_err());
        assert!(store.get_block(0, 4).is_none());
    }

    #[test]
    fn test_commit_sends_payload() {
        let store = StreamingStore::new(Capture::new(1));
        store.initialize(0).expect("initialize");

        let mut b = store.get_block(0, 3).expect("block");
        b.copy_from_slice(&[7, 8, 9]);
        store.commit_block(0, b);

        let frames = store.backend().frames.lock().expect("poisoned");
        assert_eq!(*frames, vec![(0, vec![7, 8, 9], false)]);
    }

    #[test]
    fn test_one_buffer_per_channel() {
        let store = StreamingStore::new(Capture::new(1));
        store.initialize(0).expect("initialize");

        let a = store.get_block(0, 4).expect("channel 0");
        let b = store.get_block(0, 4).expect("channel 1");
        assert!(store.get_block(0, 4).is_none());
        assert_eq!((a.token(), b.token()), (0, 1));

        store.commit_block(0, b);
        store.commit_block(0, a);
        assert!(store.get_block(0, 4).is_some());
    }

    #[test]
    fn test_block_limits() {
        let store = StreamingStore::new(Capture::new(1));
        store.initialize(0).expect("initialize");

        assert!(store.get_block(0, 0).is_none());
        assert!(store.get_block(0, STREAMING_BUFFER_SIZE - BLOCK_PREFIX + 1).is_none());
        assert!(store.get_block(0, STREAMING_BUFFER_SIZE - BLOCK_PREFIX).is_some());
    }

    #[test]
    fn test_banks_by_core() {
        let store = StreamingStore::new(Capture::new(2));
        store.initialize(0).expect("initialize");

        let b = store.get_block(1, 2).expect("bank 1");
        assert_eq!(b.token(), 2);

        // Out of range bank
        assert!(store.get_block(2, 2).is_none());

        // Committed from the wrong core is dropped
        store.commit_block(0, b);
        assert!(store.backend().frames.lock().expect("poisoned").is_empty());
    }

    #[test]
    fn test_header_is_flushed() {
        let store = StreamingStore::new(Capture::new(1));
        store.initialize(0).expect("initialize");

        let held = store.get_block(0, 2).expect("block");
        store.notify_header_updated(0, 10, &[1, 2, 3, 4]);
        store.commit_block(0, held);

        let frames = store.backend().frames.lock().expect("poisoned");
        assert_eq!(frames[0], (1, vec![1, 2, 3, 4], true));
    }

    #[test]
    fn test_close() {
        let store = StreamingStore::new(Capture::new(1));
        store.initialize(0).expect("initialize");

        let b = store.get_block(0, 2).expect("block");
        store.close();
        store.commit_block(0, b);

        assert!(store.backend().closed.load(Ordering::SeqCst));
        assert!(store.backend().frames.lock().expect("poisoned").is_empty());
        assert!(store.get_block(0, 2).is_none());
    }
}
