extern crate barman;

mod common;

use std::sync::Mutex;

use barman::error::*;
use barman::pmu::sim::SimulatedPmu;
use barman::pmu::ArmPmu;
use barman::protocol::{RecordType, MAGIC};
use barman::store::{
    Arena, CircularBuffer, DataStore, DataStoreType, StreamingBackend, StreamingStore,
};
use barman::{Agent, AgentConfig};

use common::*;

fn minimal() -> AgentConfig {
    AgentConfig::default()
        .set_string_table_length(128)
        .set_max_task_infos(0)
}

fn build<'a, S: DataStore>(
    config: &AgentConfig,
    store: S,
    sim: &'a SimulatedPmu,
) -> Agent<S, TestPlatform, ArmPmu<&'a SimulatedPmu>> {
    init_logger();

    let agent = config
        .build(store, TestPlatform::new(), ArmPmu::new(sim, config.max_cores()))
        .expect("failed to build agent");
    agent
        .initialize("unit-test", &clock(), &[], &[], 0)
        .expect("failed to initialize");
    agent
}

fn header_length(config: &AgentConfig) -> usize {
    let sim = SimulatedPmu::new(1);
    let agent = build(config, CircularBuffer::new(Arena::new(4096), 1), &sim);
    agent.protocol().header_length()
}

#[test]
fn test_circular_overwrites_oldest() {
    let config = minimal();
    let sim = SimulatedPmu::new(1);

    // Not a multiple of the record size, so the area is padded at the wrap
    let store = CircularBuffer::new(Arena::new(header_length(&config) + 250), 1);
    let mut agent = build(&config, store, &sim);

    let mut last = (0, 0);
    for t in 1..=40 {
        agent.platform().set_time(t);
        agent.before_idle();

        let (read, write) = agent.store().offsets();
        assert!(read >= last.0, "read offset moved back at {}", t);
        assert!(write > last.1, "write offset did not move at {}", t);
        assert!(write - read <= agent.store().buffer_length());
        last = (read, write);
    }

    assert!(agent.store().total_written() > agent.store().buffer_length());

    let contents = agent.store_mut().contents().to_vec();
    assert_eq!(Header(&contents).last_timestamp(), 40);

    let stamps: Vec<u64> = circular_records(&contents)
        .iter()
        .inspect(|r| assert_eq!(r.kind, RecordType::HaltEvent as u32))
        .map(|r| r.timestamp)
        .collect();

    // Only the newest records survive, in order
    let first = *stamps.first().expect("no records kept");
    assert!(first > 1);
    assert_eq!(stamps, (first..=40).collect::<Vec<_>>());
}

#[test]
fn test_circular_record_larger_than_buffer() {
    let config = minimal();
    let sim = SimulatedPmu::new(1);
    let store = CircularBuffer::new(Arena::new(header_length(&config) + 64), 1);
    let mut agent = build(&config, store, &sim);

    agent.platform().set_time(9);
    agent.annotate_marker(0, Some(&"x".repeat(100)));
    assert_eq!(agent.store().offsets(), (0, 0));

    let contents = agent.store_mut().contents().to_vec();
    assert_eq!(Header(&contents).last_timestamp(), 9);
}

/// A trace port that keeps every frame.
#[derive(Debug, Default)]
struct Capture {
    frames: Mutex<Vec<(u16, Vec<u8>, bool)>>,
}

impl Capture {
    fn frames(&self) -> Vec<(u16, Vec<u8>, bool)> {
        self.frames.lock().expect("poisoned").clone()
    }
}

impl StreamingBackend for Capture {
    fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    fn write_frame(&self, data: &[u8], channel: u16, flush: bool) {
        self.frames
            .lock()
            .expect("poisoned")
            .push((channel, data.to_vec(), flush));
    }

    fn channels(&self) -> u16 {
        2
    }
}

#[test]
fn test_streaming_frames() {
    let config = minimal().set_records_per_header_sent(3);
    let sim = SimulatedPmu::new(1);
    let agent = build(&config, StreamingStore::new(Capture::default()), &sim);
    agent
        .initialize_pmu_family(MIDR, &[0x08], None)
        .expect("failed to add family");
    agent.enable_sampling();

    for t in 1..=8 {
        agent.platform().set_time(t);
        sim.tick(10);
        agent.sample_counters(false);
    }

    let frames = agent.store().backend().frames();
    let length = agent.protocol().header_length();

    let headers: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter(|(_, (_, data, flush))| *flush && data.len() == length)
        .map(|(i, _)| i)
        .collect();

    // On initialisation, on the PMU settings, and after every fourth sample
    assert_eq!(headers, vec![0, 1, 6, 11]);

    for i in headers {
        let header = Header(&frames[i].1);
        assert_eq!(header.magic(), MAGIC);
        assert_eq!(header.data_store_type(), DataStoreType::StreamingUser as u32);
        assert_eq!(header.target_name(), "unit-test");
    }

    let samples: Vec<Record> = frames
        .iter()
        .filter(|(_, _, flush)| !*flush)
        .map(|(_, data, _)| Record::parse(data))
        .collect();

    assert_eq!(samples.len(), 8);
    for (t, sample) in (1..=8).zip(samples.iter()) {
        assert_eq!(sample.kind, RecordType::Sample as u32);
        assert_eq!(sample.timestamp, t);
        assert_eq!(sample.body.len(), 16);
        assert_eq!(u64_at(&sample.body, 8), 10 * t);
    }
}

#[test]
fn test_streaming_drops_oversized_records() {
    let sim = SimulatedPmu::new(1);
    let agent = build(&minimal(), StreamingStore::new(Capture::default()), &sim);
    let before = agent.store().backend().frames().len();

    agent.platform().set_time(4);
    agent.annotate_marker(0, Some(&"x".repeat(300)));
    agent.annotate_marker(0, Some("short"));

    let frames = agent.store().backend().frames();
    assert_eq!(frames.len(), before + 1);
    assert!(!frames[before].2);
    assert_eq!(agent.protocol().last_timestamp(), 4);
}

#[test]
fn test_streaming_closed() {
    let sim = SimulatedPmu::new(1);
    let agent = build(&minimal(), StreamingStore::new(Capture::default()), &sim);
    let before = agent.store().backend().frames().len();

    agent.close();
    agent.before_idle();
    assert_eq!(agent.store().backend().frames().len(), before);
}
