//! The protocol layer: the self-describing header and the event records.
//!
//! [`Protocol`] owns the header state (string table, per-core PMU settings,
//! task and memory map tables, custom charts) and encodes records into
//! blocks from its [`DataStore`]. Every field that can change after
//! [`initialize`](struct.Protocol.html#method.initialize) is an atomic, and
//! every table is appended to by winning a compare-and-swap on its count, so
//! all methods may be called from any core or interrupt handler at once.
//!
//! Whenever the header changes it is rendered to an image and handed to the
//! store through [`DataStore::notify_header_updated`]. In-memory stores copy
//! it into place, writing the magic last; streaming stores transmit it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::atomic::{AtomicInt, AtomicTimestamp};
use crate::config::AgentConfig;
use crate::error::{new_error, Error, ErrorKind};
use crate::platform::TaskId;
use crate::pmu::MAX_PMU_COUNTERS;
use crate::store::DataStore;

pub mod chart;
pub(crate) mod header;
mod record;
pub(crate) mod string_table;
mod writer;

pub use self::header::{MAGIC, PROTOCOL_VERSION};
pub(crate) use self::record::AnnotationFields;
pub use self::record::{
    colour, AnnotationType, RecordType, TaskSwitchReason, RECORD_HEADER_LENGTH,
};

use self::chart::{ChartSeries, CustomChart};
use self::header::HeaderLayout;
use self::string_table::{StringTable, MAX_TARGET_NAME, MAX_TASK_NAME};

const UNINITIALIZED: u32 = 0;
const CLAIMED: u32 = 1;
const PUBLISHED: u32 = 2;

/// Header updates outside the sampling path are announced on core 0's bank.
const HEADER_CORE: u32 = 0;

/// Conversion of timestamps to time, applied by the host.
///
/// `ns = (timestamp - timestamp_base) * timestamp_multiplier /
/// timestamp_divisor`, and `unix_base_ns` is the wall clock time at
/// `timestamp_base`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClockInfo {
    /// The timestamp at which the clock started.
    pub timestamp_base: u64,
    /// Multiplier converting timestamp units to nanoseconds.
    pub timestamp_multiplier: u64,
    /// Divisor converting timestamp units to nanoseconds.
    pub timestamp_divisor: u64,
    /// Nanoseconds since the Unix epoch at `timestamp_base`.
    pub unix_base_ns: u64,
}

/// A task known to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo<'a> {
    /// The task identifier.
    pub task_id: TaskId,
    /// The task name, truncated to 31 bytes.
    pub name: &'a str,
}

/// Where an image is mapped in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapLayout<'a> {
    /// The task the mapping belongs to.
    pub task_id: TaskId,
    /// Address of the first mapped byte.
    pub base_address: usize,
    /// Length of the mapping.
    pub length: usize,
    /// Offset of the mapping within the image.
    pub image_offset: usize,
    /// Path or name of the image.
    pub image_name: &'a str,
}

#[derive(Debug, Default)]
struct PmuSettings {
    claimed: AtomicBool,
    timestamp: AtomicU64,
    midr: AtomicU32,
    mpidr: AtomicUsize,
    cluster: AtomicU32,
    num_counters: AtomicU32,
    types: [AtomicU32; MAX_PMU_COUNTERS],
}

#[derive(Debug, Default)]
struct TaskEntry {
    timestamp: AtomicU64,
    task_id: AtomicU32,
    name_ptr: AtomicU32,
}

#[derive(Debug, Default)]
struct MmapEntry {
    timestamp: AtomicU64,
    task_id: AtomicU32,
    base_address: AtomicUsize,
    length: AtomicUsize,
    image_offset: AtomicUsize,
    image_ptr: AtomicU32,
}

#[derive(Debug)]
struct SeriesEntry {
    chart_index: u32,
    series: ChartSeries,
    name: AtomicU32,
    units: AtomicU32,
    description: AtomicU32,
}

/// The rendered header, owned by whoever holds `busy`.
#[derive(Debug)]
struct HeaderImage {
    busy: AtomicBool,
    dirty: AtomicBool,
    bytes: UnsafeCell<Vec<u8>>,
}

// `bytes` is only touched by the thread that set `busy`.
unsafe impl Sync for HeaderImage {}

/// The protocol header and record encoder over a data store.
#[derive(Debug)]
pub struct Protocol<S> {
    store: S,
    layout: HeaderLayout,
    max_cores: u32,
    records_per_header_sent: u32,

    state: AtomicU32,
    target_name_ptr: AtomicU32,
    timer_sample_rate: AtomicU32,
    clock: [AtomicU64; 4],
    last_timestamp: AtomicTimestamp,
    strings: StringTable,
    pmu_settings: Box<[PmuSettings]>,
    num_tasks: AtomicU32,
    tasks: Box<[TaskEntry]>,
    num_mmaps: AtomicU32,
    mmaps: Box<[MmapEntry]>,
    charts: Vec<CustomChart>,
    chart_names: Box<[AtomicU32]>,
    series: Vec<SeriesEntry>,

    header_counter: AtomicU32,
    image: HeaderImage,
}

fn atomics<T: Default>(n: u32) -> Box<[T]> {
    (0..n).map(|_| T::default()).collect()
}

impl<S: DataStore> Protocol<S> {
    pub(crate) fn new(store: S, config: &AgentConfig) -> Self {
        let charts = config.charts().to_vec();
        let series: Vec<SeriesEntry> = charts
            .iter()
            .enumerate()
            .flat_map(|(i, chart)| {
                chart.series.iter().map(move |s| SeriesEntry {
                    chart_index: i as u32,
                    series: s.clone(),
                    name: AtomicU32::new(0),
                    units: AtomicU32::new(0),
                    description: AtomicU32::new(0),
                })
            })
            .collect();

        let layout = HeaderLayout::new(
            config.max_cores(),
            config.max_task_infos(),
            config.max_mmap_layouts(),
            config.string_table_length(),
            charts.len(),
            series.len(),
        );

        Self {
            store,
            max_cores: config.max_cores(),
            records_per_header_sent: config.records_per_header_sent(),
            state: AtomicU32::new(UNINITIALIZED),
            target_name_ptr: AtomicU32::new(0),
            timer_sample_rate: AtomicU32::new(0),
            clock: Default::default(),
            last_timestamp: AtomicTimestamp::new(0),
            strings: StringTable::new(config.string_table_length()),
            pmu_settings: atomics(config.max_cores()),
            num_tasks: AtomicU32::new(0),
            tasks: atomics(config.max_task_infos()),
            num_mmaps: AtomicU32::new(0),
            mmaps: atomics(config.max_mmap_layouts()),
            chart_names: atomics(charts.len() as u32),
            charts,
            series,
            header_counter: AtomicU32::new(0),
            image: HeaderImage {
                busy: AtomicBool::new(false),
                dirty: AtomicBool::new(false),
                bytes: UnsafeCell::new(vec![0; layout.length]),
            },
            layout,
        }
    }

    /// Fill in the header, open the store and publish the header.
    ///
    /// Exactly one call succeeds. Up to the table capacities, `tasks` and
    /// `mmaps` are recorded with `clock.timestamp_base` as their timestamp;
    /// any more are ignored.
    pub fn initialize(
        &self,
        target_name: &str,
        clock: &ClockInfo,
        tasks: &[TaskInfo<'_>],
        mmaps: &[MmapLayout<'_>],
        timer_sample_rate: u32,
    ) -> Result<(), Error> {
        if clock.timestamp_multiplier == 0 || clock.timestamp_divisor == 0 {
            error!("clock_info is invalid, multiplier and divisor cannot be zero");
            return Err(new_error(ErrorKind::InvalidClock));
        }

        if !self.state.atomic_cas_value(UNINITIALIZED, CLAIMED) {
            error!("Protocol cannot be initialized twice");
            return Err(new_error(ErrorKind::AlreadyInitialized));
        }

        self.reset();

        self.timer_sample_rate.atomic_store(timer_sample_rate);
        self.clock[0].atomic_store(clock.timestamp_base);
        self.clock[1].atomic_store(clock.timestamp_multiplier);
        self.clock[2].atomic_store(clock.timestamp_divisor);
        self.clock[3].atomic_store(clock.unix_base_ns);
        self.target_name_ptr
            .atomic_store(self.strings.insert(target_name, MAX_TARGET_NAME));

        let n = tasks.len().min(self.tasks.len());
        for (index, task) in tasks[..n].iter().enumerate() {
            self.fill_task(index, clock.timestamp_base, task);
        }
        self.num_tasks.atomic_store(n as u32);

        let n = mmaps.len().min(self.mmaps.len());
        for (index, mmap) in mmaps[..n].iter().enumerate() {
            self.fill_mmap(index, clock.timestamp_base, mmap);
        }
        self.num_mmaps.atomic_store(n as u32);

        for (chart, name) in self.charts.iter().zip(self.chart_names.iter()) {
            name.atomic_store(self.strings.insert(chart.name, u32::MAX));
        }
        for entry in &self.series {
            entry.name.atomic_store(self.strings.insert(entry.series.name, u32::MAX));
            entry.units.atomic_store(self.strings.insert(entry.series.units, u32::MAX));
            entry
                .description
                .atomic_store(self.strings.insert(entry.series.description, u32::MAX));
        }

        if let Err(e) = self.store.initialize(self.layout.length) {
            error!("Protocol failed to initialize data store: {}", e);
            self.state.atomic_store(UNINITIALIZED);
            return Err(e);
        }

        self.state.atomic_store(PUBLISHED);
        self.publish(HEADER_CORE, clock.timestamp_base);

        Ok(())
    }

    // Only called while the header is claimed.
    fn reset(&self) {
        self.strings.clear();
        self.last_timestamp.store(0);
        self.header_counter.atomic_store(0);

        for settings in self.pmu_settings.iter() {
            settings.num_counters.atomic_store(0);
            settings.claimed.store(false, Ordering::Release);
        }
    }

    fn fill_task(&self, index: usize, timestamp: u64, task: &TaskInfo<'_>) {
        let entry = &self.tasks[index];
        entry.timestamp.atomic_store(timestamp);
        entry.task_id.atomic_store(task.task_id);
        entry
            .name_ptr
            .atomic_store(self.strings.insert(task.name, MAX_TASK_NAME));
    }

    fn fill_mmap(&self, index: usize, timestamp: u64, mmap: &MmapLayout<'_>) {
        let entry = &self.mmaps[index];
        entry.timestamp.atomic_store(timestamp);
        entry.task_id.atomic_store(mmap.task_id);
        entry.base_address.atomic_store(mmap.base_address);
        entry.length.atomic_store(mmap.length);
        entry.image_offset.atomic_store(mmap.image_offset);
        entry
            .image_ptr
            .atomic_store(self.strings.insert(mmap.image_name, u32::MAX));
    }

    /// True once [`initialize`](#method.initialize) has published the
    /// header.
    pub fn is_initialized(&self) -> bool {
        self.state.atomic_load() == PUBLISHED
    }

    /// The magic value currently in the header: [`MAGIC`] once published,
    /// zero before.
    pub fn magic(&self) -> u64 {
        if self.is_initialized() {
            MAGIC
        } else {
            0
        }
    }

    /// Length of the header in bytes, a multiple of 8.
    pub fn header_length(&self) -> usize {
        self.layout.length
    }

    /// The most recent timestamp seen by any write, successful or not.
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp.load()
    }

    /// The data store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The data store, for reading back in-memory captures.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Render the current header into a new buffer.
    pub fn header(&self) -> Vec<u8> {
        let mut out = vec![0; self.layout.length];
        self.render(&mut out);
        out
    }

    /// Whether records carry a task id.
    pub fn is_task_aware(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Number of custom counter series.
    pub fn num_custom_counters(&self) -> u32 {
        self.series.len() as u32
    }

    /// The series with id `counter`.
    pub fn custom_counter(&self, counter: u32) -> Option<&ChartSeries> {
        self.series.get(counter as usize).map(|e| &e.series)
    }

    /// Convert a minimum sample period in nanoseconds to timestamp units.
    ///
    /// Returns `u64::MAX` before the clock is known, so nothing is sampled.
    pub fn minimum_sample_period(&self, period_ns: u64) -> u64 {
        if !self.is_initialized() {
            debug!("Could not calculate minimum sample period as not initialized");
            return u64::MAX;
        }

        let multiplier = self.clock[1].atomic_load() as u128;
        let divisor = self.clock[2].atomic_load() as u128;
        let period = period_ns as u128 * divisor / multiplier;
        period.min(u64::MAX as u128) as u64
    }

    /// Record the PMU configuration of `core`.
    ///
    /// Each core's settings are written once; later calls fail with
    /// [`ErrorKind::SettingsWritten`].
    pub fn write_pmu_settings(
        &self,
        timestamp: u64,
        midr: u32,
        mpidr: usize,
        cluster: u32,
        core: u32,
        counter_types: &[u32],
    ) -> Result<(), Error> {
        if !self.is_initialized() {
            error!("Could not write PMU settings as not initialized");
            return Err(new_error(ErrorKind::NotInitialized));
        }

        let settings = match self.pmu_settings.get(core as usize) {
            Some(s) => s,
            None => {
                debug!("Could not write PMU settings as core {} >= max cores", core);
                return Err(new_error(ErrorKind::CoreOutOfRange));
            }
        };

        if settings
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Could not write PMU settings already set for core {}", core);
            return Err(new_error(ErrorKind::SettingsWritten));
        }

        self.raise_last_timestamp(timestamp);

        let n = counter_types.len().min(MAX_PMU_COUNTERS);
        settings.timestamp.atomic_store(timestamp);
        settings.midr.atomic_store(midr);
        settings.mpidr.atomic_store(mpidr);
        settings.cluster.atomic_store(cluster);
        for (slot, t) in settings.types.iter().zip(counter_types[..n].iter()) {
            slot.atomic_store(*t);
        }
        settings.num_counters.atomic_store(n as u32);

        self.publish(core, timestamp);
        Ok(())
    }

    /// Append a task to the header's task table.
    pub fn add_task_record(&self, timestamp: u64, task: &TaskInfo<'_>) -> Result<(), Error> {
        if !self.is_initialized() {
            error!("Could not add task info as not initialized");
            return Err(new_error(ErrorKind::NotInitialized));
        }

        self.raise_last_timestamp(timestamp);

        let index = claim_index(&self.num_tasks, self.tasks.len() as u32)?;
        self.fill_task(index, timestamp, task);
        self.publish(HEADER_CORE, timestamp);
        Ok(())
    }

    /// Append a mapping to the header's memory map table.
    pub fn add_mmap_record(&self, timestamp: u64, mmap: &MmapLayout<'_>) -> Result<(), Error> {
        if !self.is_initialized() {
            error!("Could not add mmap info as not initialized");
            return Err(new_error(ErrorKind::NotInitialized));
        }

        self.raise_last_timestamp(timestamp);

        let index = claim_index(&self.num_mmaps, self.mmaps.len() as u32)?;
        self.fill_mmap(index, timestamp, mmap);
        self.publish(HEADER_CORE, timestamp);
        Ok(())
    }

    /// Close the data store.
    pub fn close(&self) {
        self.store.close()
    }

    fn raise_last_timestamp(&self, timestamp: u64) {
        self.last_timestamp.raise_to(timestamp);
        self.store.record_last_timestamp(timestamp);
    }
}

/// Claim the next slot of a table holding at most `capacity` entries.
fn claim_index(count: &AtomicU32, capacity: u32) -> Result<usize, Error> {
    let mut index = count.atomic_load();
    loop {
        if index >= capacity {
            warn!("Could not add entry as the table is full (capacity={})", capacity);
            return Err(new_error(ErrorKind::TableFull));
        }
        let next = index + 1;
        if count.atomic_cas_weak(&mut index, next) {
            return Ok(index as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Arena, LinearBuffer};

    fn read_u32(b: &[u8], at: usize) -> u32 {
        let mut w = [0u8; 4];
        w.copy_from_slice(&b[at..at + 4]);
        u32::from_ne_bytes(w)
    }

    fn read_u64(b: &[u8], at: usize) -> u64 {
        let mut w = [0u8; 8];
        w.copy_from_slice(&b[at..at + 8]);
        u64::from_ne_bytes(w)
    }

    fn clock() -> ClockInfo {
        ClockInfo {
            timestamp_base: 10,
            timestamp_multiplier: 1,
            timestamp_divisor: 1,
            unix_base_ns: 1_000,
        }
    }

    fn protocol(config: &AgentConfig, size: usize) -> Protocol<LinearBuffer> {
        let store = LinearBuffer::new(Arena::new(size), config.max_cores());
        Protocol::new(store, config)
    }

    fn small() -> AgentConfig {
        AgentConfig::default()
            .set_max_cores(2)
            .set_max_task_infos(2)
            .set_string_table_length(64)
    }

    #[test]
    fn test_invalid_clock() {
        let p = protocol(&small(), 2048);
        let clock = ClockInfo {
            timestamp_divisor: 0,
            ..clock()
        };

        let err = p.initialize("t", &clock, &[], &[], 0).expect_err("zero divisor");
        assert_eq!(err.kind(), &ErrorKind::InvalidClock);
        assert!(!p.is_initialized());

        // Nothing was claimed
        p.initialize("t", &self::clock(), &[], &[], 0).expect("initialize");
    }

    #[test]
    fn test_initialize_once() {
        let p = protocol(&small(), 2048);
        assert_eq!(p.magic(), 0);

        p.initialize("board", &clock(), &[], &[], 100).expect("initialize");
        assert_eq!(p.magic(), MAGIC);

        let err = p.initialize("board", &clock(), &[], &[], 100).expect_err("twice");
        assert_eq!(err.kind(), &ErrorKind::AlreadyInitialized);
    }

    #[test]
    fn test_store_failure_releases_claim() {
        // Too small for the header
        let p = protocol(&small(), 64);
        let err = p.initialize("board", &clock(), &[], &[], 0).expect_err("small");
        assert_eq!(err.kind(), &ErrorKind::BufferTooSmall);
        assert!(!p.is_initialized());
    }

    #[test]
    fn test_header_fields() {
        let tasks = [
            TaskInfo {
                task_id: 7,
                name: "idle",
            },
            TaskInfo {
                task_id: 8,
                name: "main",
            },
            TaskInfo {
                task_id: 9,
                name: "dropped",
            },
        ];

        let mut p = protocol(&small(), 2048);
        p.initialize("board", &clock(), &tasks, &[], 100).expect("initialize");

        let length = p.header_length();
        let layout = p.layout.clone();
        let image = p.header();
        let h = &p.store_mut().contents()[..length];

        assert_eq!(read_u64(h, header::MAGIC_OFFSET), MAGIC);
        assert_eq!(read_u32(h, 8), PROTOCOL_VERSION);
        assert_eq!(read_u32(h, 12) as usize, length);
        assert_eq!(read_u32(h, 16), 1);
        assert_eq!(read_u32(h, 32), 100);

        // max_cores, max_task_infos, max_mmap_layouts, max_pmu_counters,
        // string table length, custom counters
        let constants: Vec<u32> = (0..6).map(|i| read_u32(h, 36 + 4 * i)).collect();
        assert_eq!(constants, vec![2, 2, 0, 32, 64, 0]);

        assert_eq!(read_u64(h, 60), 10);
        assert_eq!(read_u64(h, 84), 1_000);

        let name = read_u32(h, 20) as usize;
        assert_eq!(&h[96 + name..96 + name + 6], b"board\0");

        let tasks_at = layout.tasks.expect("task table");
        assert_eq!(read_u32(h, tasks_at), 2);
        assert_eq!(read_u64(h, tasks_at + 4), 10);
        assert_eq!(read_u32(h, tasks_at + 12), 7);
        assert_eq!(read_u32(h, tasks_at + 16 + 12), 8);

        // The memory image and a fresh render agree outside the live fields
        assert_eq!(&h[..24], &image[..24]);
        assert_eq!(&h[32..layout.params], &image[32..layout.params]);
    }

    #[test]
    fn test_pmu_settings_once_per_core() {
        let mut p = protocol(&small(), 2048);

        let err = p
            .write_pmu_settings(1, 0x4100c090, 0, 0, 0, &[!0, 3])
            .expect_err("not initialized");
        assert_eq!(err.kind(), &ErrorKind::NotInitialized);

        p.initialize("board", &clock(), &[], &[], 0).expect("initialize");
        p.write_pmu_settings(20, 0x4100c090, 0x101, 1, 1, &[!0, 3])
            .expect("first write");

        let err = p
            .write_pmu_settings(21, 0x4100c090, 0x101, 1, 1, &[!0])
            .expect_err("second write");
        assert_eq!(err.kind(), &ErrorKind::SettingsWritten);

        let err = p
            .write_pmu_settings(21, 0x4100c090, 0x102, 0, 2, &[!0])
            .expect_err("out of range");
        assert_eq!(err.kind(), &ErrorKind::CoreOutOfRange);

        assert_eq!(p.last_timestamp(), 20);

        let length = p.header_length();
        let at = p.layout.pmu_settings + header::PMU_SETTINGS_LENGTH;
        let h = &p.store_mut().contents()[..length];
        let usz = std::mem::size_of::<usize>();

        assert_eq!(read_u64(h, at), 20);
        assert_eq!(read_u32(h, at + 8), 0x4100c090);
        assert_eq!(read_u32(h, at + 12 + usz), 1);
        assert_eq!(read_u32(h, at + 16 + usz), 2);
        assert_eq!(read_u32(h, at + 20 + usz), !0);
        assert_eq!(read_u32(h, at + 24 + usz), 3);
    }

    #[test]
    fn test_task_table_full() {
        let p = protocol(&small(), 2048);
        let task = TaskInfo {
            task_id: 1,
            name: "t",
        };

        let err = p.add_task_record(5, &task).expect_err("not initialized");
        assert_eq!(err.kind(), &ErrorKind::NotInitialized);

        p.initialize("board", &clock(), &[], &[], 0).expect("initialize");
        p.add_task_record(50, &task).expect("first");
        p.add_task_record(60, &task).expect("second");

        // A failed append still moves the last timestamp
        let err = p.add_task_record(70, &task).expect_err("full");
        assert_eq!(err.kind(), &ErrorKind::TableFull);
        assert_eq!(p.last_timestamp(), 70);
    }

    #[test]
    fn test_mmap_table_disabled() {
        let p = protocol(&small(), 2048);
        p.initialize("board", &clock(), &[], &[], 0).expect("initialize");

        let mmap = MmapLayout {
            task_id: 1,
            base_address: 0x8000,
            length: 0x1000,
            image_offset: 0,
            image_name: "app.elf",
        };
        let err = p.add_mmap_record(80, &mmap).expect_err("disabled");
        assert_eq!(err.kind(), &ErrorKind::TableFull);

        // The attempt still moved the last timestamp
        assert_eq!(p.last_timestamp(), 80);
    }

    #[test]
    fn test_minimum_sample_period() {
        let p = protocol(&small(), 2048);
        assert_eq!(p.minimum_sample_period(1000), u64::MAX);

        let clock = ClockInfo {
            timestamp_multiplier: 1000,
            timestamp_divisor: 24,
            ..clock()
        };
        p.initialize("board", &clock, &[], &[], 0).expect("initialize");

        // A 24 MHz counter: 1 ms is 24000 ticks
        assert_eq!(p.minimum_sample_period(1_000_000), 24_000);
        assert_eq!(p.minimum_sample_period(u64::MAX), 442_721_857_769_029_238);

        // Periods beyond the range of the clock saturate
        let fast = protocol(&small(), 2048);
        let doubled = ClockInfo {
            timestamp_multiplier: 1,
            timestamp_divisor: 2,
            ..self::clock()
        };
        fast.initialize("board", &doubled, &[], &[], 0).expect("initialize");
        assert_eq!(fast.minimum_sample_period(1_000), 2_000);
        assert_eq!(fast.minimum_sample_period(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_concurrent_initialize() {
        let p = protocol(&small(), 2048);
        let barrier = std::sync::Barrier::new(4);

        let ok = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        p.initialize("board", &clock(), &[], &[], 0).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread"))
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(ok, 1);
        assert_eq!(p.magic(), MAGIC);
    }
}
