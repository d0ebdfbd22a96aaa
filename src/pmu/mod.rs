//! Hardware performance counter drivers.
//!
//! A [`CounterDriver`] programs and reads the counters of one core at a time.
//! It is always called on the core whose counters it touches; the `core`
//! argument only selects the driver's per-core bookkeeping.
//!
//! [`ArmPmu`] drives the Arm PMUv3 through any [`PmuRegisters`]
//! implementation: [`SystemRegisters`] on target, or the [`sim`] register
//! file on a host.

use crate::error::Error;

mod arm;
mod registers;
pub mod sim;

pub use self::arm::ArmPmu;
pub use self::registers::{PmuRegisters, SystemRegisters};

/// The largest number of counters (including the cycle counter) a core can
/// report.
pub const MAX_PMU_COUNTERS: usize = 32;

/// The event type recorded for a fixed cycle counter.
pub const CYCLE_COUNTER_TYPE: u32 = !0;

/// The value read from a counter that does not exist or is not configured.
pub const INVALID_COUNTER_VALUE: u64 = !0;

/// Per-core counter programming and reading.
pub trait CounterDriver: Sync {
    /// Program the counters of `core` to count `event_types`.
    ///
    /// Returns the number of counters enabled, including the cycle counter
    /// when [`has_cycle_counter`](#method.has_cycle_counter) is true. Must be
    /// called once per core before any other method.
    fn init(&self, core: u32, event_types: &[u32]) -> Result<u32, Error>;

    /// Start counting on `core`.
    fn start(&self, core: u32);

    /// Stop counting on `core`.
    fn stop(&self, core: u32);

    /// Read the 64-bit accumulated value of logical counter `counter_no`.
    ///
    /// Returns [`INVALID_COUNTER_VALUE`] for counters that are not
    /// configured.
    fn read_counter(&self, core: u32, counter_no: u32) -> u64;

    /// Whether logical counter 0 is a fixed cycle counter.
    fn has_cycle_counter(&self) -> bool {
        true
    }
}
