extern crate barman;
extern crate env_logger;

use std::fs;
use std::thread;
use std::time::Duration;

use barman::pmu::{sim::SimulatedPmu, ArmPmu};
use barman::protocol::chart::*;
use barman::store::{Arena, CircularBuffer};
use barman::{colour, AgentConfig, HostPlatform, TaskInfo};

// A Cortex-A53, reported by the host platform for every CPU
const MIDR: u32 = 0x410f_d034;

// CPU cycles are always counted; add instructions retired and L1D refills
const EVENTS: [u32; 2] = [0x08, 0x03];

fn queue_depth() -> Option<u64> {
	Some(3)
}

fn main() {
	env_logger::init();

	let cores = HostPlatform::online_cores();
	let platform = HostPlatform::new().unwrap().with_midr(MIDR);
	let clock = platform.clock_info();

	// Counters on a host do not move by themselves, the workers tick them
	let pmu = SimulatedPmu::new(4);

	let config = AgentConfig::default()
		.set_max_cores(cores)
		.set_min_sample_period(1_000_000)
		.add_chart(
			CustomChart::new("Work queue", SeriesComposition::Stacked, RenderingType::Line)
				.add_series(
					ChartSeries::new("depth", "items", SeriesClass::Absolute, SeriesDisplay::Maximum)
						.set_sampler(queue_depth),
				),
		);

	let store = CircularBuffer::new(Arena::new(256 * 1024), cores);
	let mut agent = config
		.build(store, platform, ArmPmu::new(&pmu, cores))
		.unwrap();

	let tasks = [TaskInfo {
		task_id: 1,
		name: "main",
	}];
	agent.initialize("host-demo", &clock, &tasks, &[], 0).unwrap();
	agent.initialize_pmu_family(MIDR, &EVENTS, None).unwrap();

	agent.annotate_name_group(1, Some("demo"));
	agent.annotate_name_channel(0, 1, Some("workers"));
	agent.enable_sampling();

	thread::scope(|s| {
		for worker in 0..4 {
			let agent = &agent;
			let pmu = &pmu;
			s.spawn(move || {
				for i in 0..50 {
					// do some stuff...
					pmu.tick(1000 * (worker + 1));
					agent.sample_counters(true);

					if i % 10 == 0 {
						agent.annotate_channel(0, colour::CYCLIC, Some("tick"));
					}

					agent.wfi();
					thread::sleep(Duration::from_millis(2));
				}
			});
		}
	});

	agent.annotate_marker(colour::GREEN, Some("done"));
	agent.disable_sampling();

	let (read, write) = agent.store().offsets();
	println!(
		"kept {} of {} bytes written, header {} bytes",
		write - read,
		agent.store().total_written(),
		agent.store().header_length()
	);

	// Optionally save the capture for a host side decoder
	if let Some(path) = std::env::args().nth(1) {
		fs::write(&path, agent.store_mut().contents()).unwrap();
		println!("capture written to {}", path);
	}
}
