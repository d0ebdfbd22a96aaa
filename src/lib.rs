#![warn(missing_docs)]

//! `barman` is a profiling agent for bare-metal and RTOS targets that
//! samples the hardware Performance Monitor Unit of each core and records the
//! counter values, task switches, idle periods, custom counters and
//! annotations for later analysis on a host.
//!
//! Nothing in the recording path takes a lock: every method on [`Agent`] may
//! be called from any core, or from an interrupt handler that pre-empted
//! another call on the same core, and either completes or drops its record.
//! All shared state is updated with atomic compare-and-swap.
//!
//! The captured data is self-describing. A header (see [`protocol`]) carries
//! the clock parameters, the target name, the tasks and memory maps, the PMU
//! configuration of each core and any custom charts, followed by a stream of
//! records. Where the data goes is decided by the [`DataStore`]:
//!
//! * [`LinearBuffer`] fills a memory region once and stops.
//! * [`CircularBuffer`] overwrites the oldest records when full.
//! * [`StreamingStore`] sends every record over a trace port: the Cortex-M
//!   [`Itm`], the CoreSight [`Stm`], the [`Etm`] (through a debugger
//!   watchpoint), or a user supplied [`StreamingBackend`].
//!
//! ```
//! use barman::pmu::{sim::SimulatedPmu, ArmPmu};
//! use barman::store::{Arena, LinearBuffer};
//! use barman::{AgentConfig, HostPlatform};
//!
//! let platform = HostPlatform::new()?.with_midr(0x410f_d034);
//! let clock = platform.clock_info();
//!
//! let agent = AgentConfig::default().set_max_cores(HostPlatform::online_cores()).build(
//!     LinearBuffer::new(Arena::new(64 * 1024), HostPlatform::online_cores()),
//!     platform,
//!     ArmPmu::new(SimulatedPmu::new(4), HostPlatform::online_cores()),
//! )?;
//!
//! agent.initialize("host", &clock, &[], &[], 0)?;
//! agent.initialize_pmu_family(0x410f_d034, &[0x08, 0x11], None)?;
//! agent.enable_sampling();
//!
//! agent.sample_counters(true);
//! agent.annotate_marker(barman::colour::GREEN, Some("done"));
//! agent.disable_sampling();
//! #
//! # Ok::<(), barman::Error>(())
//! ```
//!
//! [`LinearBuffer`]: store/struct.LinearBuffer.html
//! [`CircularBuffer`]: store/struct.CircularBuffer.html
//! [`StreamingStore`]: store/struct.StreamingStore.html
//! [`StreamingBackend`]: store/trait.StreamingBackend.html
//! [`Itm`]: store/struct.Itm.html
//! [`Stm`]: store/struct.Stm.html
//! [`Etm`]: store/struct.Etm.html
//! [`DataStore`]: store/trait.DataStore.html

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate libc;

#[cfg(target_arch = "aarch64")]
mod sysreg;
#[cfg(not(target_arch = "aarch64"))]
mod stubs;

pub mod atomic;
pub mod error;
pub mod platform;
pub mod pmu;
pub mod protocol;
pub mod store;

mod state;

mod agent;
pub use self::agent::Agent;

pub mod config;
pub use self::config::AgentConfig;

pub use self::error::{Error, ErrorKind};
pub use self::platform::{BareMetal, HostPlatform, Platform, TaskId};
pub use self::protocol::{
    colour, AnnotationType, ClockInfo, MmapLayout, TaskInfo, TaskSwitchReason,
};
