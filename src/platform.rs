//! Collaborators supplied by the target: the clock, core identity, the
//! current task, cache maintenance and the halt instructions.
//!
//! [`BareMetal`] reads the AArch64 system registers directly and is the
//! platform used on target. [`HostPlatform`] runs on a hosted OS and is used
//! by the demos and tests.

use std::sync::atomic::AtomicUsize;

use crate::atomic::AtomicInt;
use crate::error::{new_os_error, Error, ErrorKind};
use crate::protocol::ClockInfo;

#[cfg(target_arch = "aarch64")]
use crate::sysreg::*;

#[cfg(not(target_arch = "aarch64"))]
use super::stubs::*;

/// A task identifier as understood by the RTOS.
pub type TaskId = u32;

/// MPIDR multiprocessing extensions bit.
pub const MPIDR_M_BIT: usize = 1 << 31;

/// MPIDR uniprocessor bit.
pub const MPIDR_U_BIT: usize = 1 << 30;

/// Cleans `length` bytes starting at the pointer from the data cache so an
/// external reader of physical memory sees them.
pub type CacheClean = fn(*const u8, usize);

/// A [`CacheClean`] for targets without data caches (or hosted tests).
pub fn no_cache_clean(_pointer: *const u8, _length: usize) {}

/// Target services used by the agent.
///
/// Implementations must be callable from any core and any interrupt context
/// at the same time; none of the methods may block.
pub trait Platform: Sync {
    /// A monotonically increasing timestamp in the units described by the
    /// [`ClockInfo`] passed to `initialize`.
    fn timestamp(&self) -> u64;

    /// The MIDR (main ID register) of the calling core.
    fn midr(&self) -> u32;

    /// The MPIDR (multiprocessor affinity register) of the calling core.
    fn mpidr(&self) -> usize;

    /// Map an MPIDR value to a dense core number in `[0, max_cores)`.
    fn map_mpidr_to_core_no(&self, mpidr: usize) -> u32;

    /// Map an MPIDR value to a dense cluster number.
    fn map_mpidr_to_cluster_no(&self, _mpidr: usize) -> u32 {
        0
    }

    /// The dense core number of the calling core.
    fn core_no(&self) -> u32 {
        let mpidr = self.mpidr();
        if is_uniprocessor(mpidr) {
            return 0;
        }
        self.map_mpidr_to_core_no(mpidr)
    }

    /// The identifier of the task running on the calling core.
    fn current_task_id(&self) -> TaskId {
        0
    }

    /// Halt until an interrupt arrives.
    fn wait_for_interrupt(&self) {}

    /// Halt until an event arrives.
    fn wait_for_event(&self) {}

    /// The return address of the sampling call, if the platform can find it.
    fn return_address(&self) -> Option<usize> {
        None
    }
}

/// True when the MPIDR describes a uniprocessor system.
#[inline]
pub fn is_uniprocessor(mpidr: usize) -> bool {
    (mpidr & MPIDR_M_BIT) != 0 && (mpidr & MPIDR_U_BIT) != 0
}

const NO_MPIDR: usize = !0;

/// Core numbering for single core targets.
///
/// The first MPIDR seen becomes core 0; every other MPIDR maps to core 1,
/// which is out of range when only one core is configured.
#[derive(Debug)]
pub struct FirstCoreMapping {
    first: AtomicUsize,
}

impl FirstCoreMapping {
    /// A mapping that has not seen any core yet.
    pub const fn new() -> Self {
        Self {
            first: AtomicUsize::new(NO_MPIDR),
        }
    }

    /// The core number for `mpidr`.
    pub fn core_no(&self, mpidr: usize) -> u32 {
        let mut first = NO_MPIDR;
        if self.first.atomic_cas_strong(&mut first, mpidr) || first == mpidr {
            0
        } else {
            1
        }
    }
}

impl Default for FirstCoreMapping {
    fn default() -> Self {
        Self::new()
    }
}

/// AArch64 bare-metal platform.
///
/// Timestamps come from the virtual counter (`CNTVCT_EL0`). Core numbers use
/// [`FirstCoreMapping`] unless a mapping function is supplied.
#[derive(Debug, Default)]
pub struct BareMetal {
    core_map: Option<fn(usize) -> u32>,
    cluster_map: Option<fn(usize) -> u32>,
    first: FirstCoreMapping,
}

impl BareMetal {
    /// A single core platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `core_map` and `cluster_map` to number cores on a multi-core
    /// target.
    pub fn with_affinity_map(self, core_map: fn(usize) -> u32, cluster_map: fn(usize) -> u32) -> Self {
        Self {
            core_map: Some(core_map),
            cluster_map: Some(cluster_map),
            ..self
        }
    }
}

impl Platform for BareMetal {
    #[inline]
    fn timestamp(&self) -> u64 {
        unsafe { read_cntvct_el0() }
    }

    fn midr(&self) -> u32 {
        unsafe { read_midr_el1() as u32 }
    }

    #[inline]
    fn mpidr(&self) -> usize {
        unsafe { read_mpidr_el1() as usize }
    }

    fn map_mpidr_to_core_no(&self, mpidr: usize) -> u32 {
        match self.core_map {
            Some(f) => f(mpidr),
            None => self.first.core_no(mpidr),
        }
    }

    fn map_mpidr_to_cluster_no(&self, mpidr: usize) -> u32 {
        self.cluster_map.map_or(0, |f| f(mpidr))
    }

    fn wait_for_interrupt(&self) {
        unsafe { wfi() }
    }

    fn wait_for_event(&self) {
        unsafe { wfe() }
    }

    // Exact when the sampling call is the first call made by its caller.
    #[inline(always)]
    fn return_address(&self) -> Option<usize> {
        Some(unsafe { read_lr() })
    }
}

/// Clean a range from the data cache using `DC CVAC`.
///
/// Usable as a [`CacheClean`] for in-memory data stores on AArch64.
pub fn clean_data_cache(pointer: *const u8, length: usize) {
    if length == 0 {
        return;
    }

    // CTR_EL0.DminLine is log2 of the smallest line in words
    let line = 4usize << (unsafe { read_ctr_el0() } >> 16 & 0xf);
    let end = pointer as usize + length;
    let mut address = pointer as usize & !(line - 1);

    while address < end {
        unsafe { dc_cvac(address) };
        address += line;
    }

    crate::atomic::dsb();
}

lazy_static! {
    static ref ONLINE_CPUS: u32 = {
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if n < 1 {
            1
        } else {
            n as u32
        }
    };
}

/// A platform for hosted operating systems.
///
/// Timestamps are `CLOCK_MONOTONIC` nanoseconds, the core number is the CPU
/// the calling thread runs on and the task id is the thread id. There is no
/// MIDR on a host, so the value reported is configurable.
#[derive(Debug, Clone, Copy)]
pub struct HostPlatform {
    midr: u32,
}

impl HostPlatform {
    /// Check the host clock is usable and create the platform.
    pub fn new() -> Result<Self, Error> {
        let mut res = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        if unsafe { libc::clock_getres(libc::CLOCK_MONOTONIC, &mut res) } != 0 {
            return Err(new_os_error(ErrorKind::Unsupported));
        }

        Ok(Self { midr: 0 })
    }

    /// Report `midr` as the MIDR of every core.
    pub fn with_midr(self, midr: u32) -> Self {
        Self { midr }
    }

    /// The number of online CPUs, suitable for [`AgentConfig::set_max_cores`].
    ///
    /// [`AgentConfig::set_max_cores`]: ../config/struct.AgentConfig.html#method.set_max_cores
    pub fn online_cores() -> u32 {
        *ONLINE_CPUS
    }

    /// Clock parameters for timestamps produced by this platform.
    pub fn clock_info(&self) -> ClockInfo {
        ClockInfo {
            timestamp_base: self.timestamp(),
            timestamp_multiplier: 1,
            timestamp_divisor: 1,
            unix_base_ns: read_clock(libc::CLOCK_REALTIME),
        }
    }
}

fn read_clock(clock: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(clock, &mut ts) };
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

impl Platform for HostPlatform {
    fn timestamp(&self) -> u64 {
        read_clock(libc::CLOCK_MONOTONIC)
    }

    fn midr(&self) -> u32 {
        self.midr
    }

    fn mpidr(&self) -> usize {
        #[cfg(target_os = "linux")]
        {
            let cpu = unsafe { libc::sched_getcpu() };
            if cpu >= 0 {
                return cpu as usize;
            }
        }
        0
    }

    fn map_mpidr_to_core_no(&self, mpidr: usize) -> u32 {
        mpidr as u32
    }

    fn current_task_id(&self) -> TaskId {
        #[cfg(target_os = "linux")]
        {
            unsafe { libc::syscall(libc::SYS_gettid) as TaskId }
        }
        #[cfg(not(target_os = "linux"))]
        {
            unsafe { libc::getpid() as TaskId }
        }
    }

    fn wait_for_interrupt(&self) {
        std::thread::yield_now()
    }

    fn wait_for_event(&self) {
        std::thread::yield_now()
    }
}
