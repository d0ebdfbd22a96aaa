use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::atomic::{self, AtomicInt};
use crate::error::{new_error, Error, ErrorKind};

use super::{CounterDriver, PmuRegisters, INVALID_COUNTER_VALUE, MAX_PMU_COUNTERS};

const PMCR_E: u32 = 1 << 0;
const PMCR_P: u32 = 1 << 1;
const PMCR_C: u32 = 1 << 2;
const PMCR_LC: u32 = 1 << 6;
const PMCR_N_SHIFT: u32 = 11;
const PMCR_N_MASK: u32 = 0x1f;

#[cfg(target_pointer_width = "64")]
const PMCR_RESET_VALUE: u32 = PMCR_LC;
#[cfg(not(target_pointer_width = "64"))]
const PMCR_RESET_VALUE: u32 = 0;

const EVTYPE_MASK: u32 = 0xffff;
const EVTYPE_NSH: u32 = 1 << 27;

// EN | SW | CR | ER
const USERENR_ALL: u32 = 0xf;

const CYCLE_COUNTER_NO: u32 = 0;
const CYCLE_COUNTER_HW_NO: u32 = 31;
const NO_HW_COUNTER: u32 = !0;

const ALL_COUNTERS: u32 = 0xffff_ffff;
const HIGH_WORD: u64 = 0xffff_ffff_0000_0000;
const WRAP: u64 = 1 << 32;

#[derive(Debug)]
struct CoreCounters {
    values: [AtomicU64; MAX_PMU_COUNTERS],
    n_events: AtomicU32,
    initialized: AtomicBool,
}

impl CoreCounters {
    fn new() -> Self {
        Self {
            values: Default::default(),
            n_events: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
        }
    }
}

/// Driver for the Arm PMUv3 (and the compatible ARMv7 PMU).
///
/// The 32-bit hardware counters are extended to 64 bits in software using the
/// overflow flags. Logical counter 0 is the cycle counter and logical counter
/// `k > 0` is hardware event counter `k - 1`.
#[derive(Debug)]
pub struct ArmPmu<R> {
    registers: R,
    cores: Vec<CoreCounters>,
    user_access: bool,
    interrupts: bool,
    cycle_counter: bool,
}

impl<R> ArmPmu<R>
where
    R: PmuRegisters,
{
    /// A driver for `max_cores` cores with user mode access enabled, overflow
    /// interrupts disabled and the cycle counter enabled.
    pub fn new(registers: R, max_cores: u32) -> Self {
        Self {
            registers,
            cores: (0..max_cores).map(|_| CoreCounters::new()).collect(),
            user_access: true,
            interrupts: false,
            cycle_counter: true,
        }
    }

    /// Allow (or deny) EL0 access to the counters.
    pub fn set_user_access(mut self, enabled: bool) -> Self {
        self.user_access = enabled;
        self
    }

    /// Raise an interrupt when a counter overflows.
    pub fn set_overflow_interrupts(mut self, enabled: bool) -> Self {
        self.interrupts = enabled;
        self
    }

    /// Use the fixed cycle counter as logical counter 0.
    pub fn set_cycle_counter(mut self, enabled: bool) -> Self {
        self.cycle_counter = enabled;
        self
    }

    /// The register interface.
    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// The number of event counters (excluding the cycle counter) configured
    /// on `core` by the last `init`.
    pub fn configured_events(&self, core: u32) -> u32 {
        self.initialized_core(core)
            .map_or(0, |c| c.n_events.atomic_load())
    }

    fn hardware_counters(&self) -> u32 {
        (self.registers.read_control() >> PMCR_N_SHIFT) & PMCR_N_MASK
    }

    fn hardware_counter_no(&self, counter_no: u32) -> u32 {
        if counter_no == CYCLE_COUNTER_NO {
            return CYCLE_COUNTER_HW_NO;
        }

        let hw = counter_no - 1;
        if hw < self.hardware_counters() {
            hw
        } else {
            NO_HW_COUNTER
        }
    }

    fn reset(&self) {
        let r = &self.registers;
        r.disable_interrupts(ALL_COUNTERS);
        r.disable_counters(ALL_COUNTERS);
        r.isb();
        r.clear_overflow(ALL_COUNTERS);
        r.write_control(PMCR_RESET_VALUE | PMCR_P | PMCR_C);
        r.isb();
    }

    fn configure_counter(&self, hw: u32) {
        if self.interrupts {
            self.registers.enable_interrupts(1 << hw);
        }
        self.registers.enable_counters(1 << hw);
    }

    fn initialized_core(&self, core: u32) -> Option<&CoreCounters> {
        self.cores
            .get(core as usize)
            .filter(|c| c.initialized.load(Ordering::Acquire))
    }

    // Reads the 32-bit counter and its overflow flag as a consistent pair.
    //
    // The pair cannot be read atomically when counters are readable at EL0,
    // so the flag is read before and after. When they differ the read is
    // retried once; two overflows inside one read are assumed impossible.
    fn read_with_overflow(&self, hw: u32) -> (u32, bool) {
        let bit = 1 << hw;
        let mut value = 0;
        let mut after = 0;

        for _ in 0..2 {
            let before = self.registers.read_overflow();
            value = if hw == CYCLE_COUNTER_HW_NO {
                self.registers.read_cycle_counter()
            } else {
                self.registers.read_event_counter(hw)
            };
            after = self.registers.read_overflow();

            if before & bit == after & bit {
                break;
            }
        }

        (value, after & bit != 0)
    }
}

impl<R> CounterDriver for ArmPmu<R>
where
    R: PmuRegisters,
{
    fn init(&self, core: u32, event_types: &[u32]) -> Result<u32, Error> {
        let state = match self.cores.get(core as usize) {
            Some(s) => s,
            None => return Err(new_error(ErrorKind::CoreOutOfRange)),
        };

        state.initialized.store(false, Ordering::Release);

        let n_events = (event_types.len() as u32).min(self.hardware_counters());

        self.reset();

        if self.cycle_counter {
            self.registers.write_cycle_filter(EVTYPE_NSH);
            self.configure_counter(CYCLE_COUNTER_HW_NO);
        }

        for (hw, value) in state.values.iter().enumerate() {
            value.atomic_store(0);

            if (hw as u32) < n_events {
                let event = event_types[hw];
                self.registers
                    .write_event_type(hw as u32, (event & EVTYPE_MASK) | EVTYPE_NSH);
                self.configure_counter(hw as u32);
            }
        }

        self.registers
            .write_user_enable(if self.user_access { USERENR_ALL } else { 0 });
        self.registers.isb();

        state.n_events.atomic_store(n_events);
        state.initialized.store(true, Ordering::Release);
        atomic::dsb();

        debug!("core {}: {} event counters configured", core, n_events);

        Ok(n_events + self.cycle_counter as u32)
    }

    fn start(&self, core: u32) {
        if self.initialized_core(core).is_some() {
            self.registers.write_control(PMCR_RESET_VALUE | PMCR_E);
        }
    }

    fn stop(&self, core: u32) {
        if self.initialized_core(core).is_some() {
            self.registers.write_control(PMCR_RESET_VALUE & !PMCR_E);
        }
    }

    fn read_counter(&self, core: u32, counter_no: u32) -> u64 {
        let state = match self.initialized_core(core) {
            Some(s) => s,
            None => return INVALID_COUNTER_VALUE,
        };

        let hw = self.hardware_counter_no(counter_no);
        if hw > CYCLE_COUNTER_HW_NO {
            return INVALID_COUNTER_VALUE;
        }

        if hw == CYCLE_COUNTER_HW_NO {
            if let Some(v) = self.registers.read_cycle_counter_64() {
                return v;
            }
        }

        let stored = &state.values[counter_no as usize];
        let mut current = stored.atomic_load();

        loop {
            let (low, overflowed) = self.read_with_overflow(hw);

            let mut value = if overflowed {
                self.registers.clear_overflow(1 << hw);
                self.registers.isb();
                ((current & HIGH_WORD) + WRAP) | low as u64
            } else {
                (current & HIGH_WORD) | low as u64
            };

            // Another reader consumed an overflow between our load of the
            // stored value and the hardware read.
            if value < current {
                value += WRAP;
            }

            if value == current {
                return value;
            }

            let mut updated = false;
            while current < value && !updated {
                updated = stored.atomic_cas_strong(&mut current, value);
            }

            if updated {
                return value;
            }
        }
    }

    fn has_cycle_counter(&self) -> bool {
        self.cycle_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::sim::SimulatedPmu;

    fn driver(n: u32) -> ArmPmu<SimulatedPmu> {
        ArmPmu::new(SimulatedPmu::new(n), 1)
    }

    #[test]
    fn test_init_reports_configured_counters() {
        let pmu = driver(6);
        assert_eq!(pmu.init(0, &[0x11, 0x08, 0x03]).expect("init failed"), 4);

        let regs = pmu.registers();
        assert_eq!(regs.event_type(0), 0x11 | EVTYPE_NSH);
        assert_eq!(regs.event_type(2), 0x03 | EVTYPE_NSH);
        assert_eq!(regs.enabled_counters(), 0b111 | 1 << 31);
        assert_eq!(regs.user_enable(), USERENR_ALL);
        assert_eq!(regs.overflow_flags(), 0);
    }

    #[test]
    fn test_init_clamps_to_hardware() {
        let pmu = driver(2);
        assert_eq!(pmu.init(0, &[1, 2, 3, 4]).expect("init failed"), 3);
        assert_eq!(pmu.configured_events(0), 2);
        assert_eq!(pmu.read_counter(0, 3), INVALID_COUNTER_VALUE);
    }

    #[test]
    fn test_init_without_cycle_counter() {
        let pmu = driver(4).set_cycle_counter(false);
        assert_eq!(pmu.init(0, &[1]).expect("init failed"), 1);
        assert!(!pmu.has_cycle_counter());
    }

    #[test]
    fn test_init_core_out_of_range() {
        let pmu = driver(4);
        let err = pmu.init(1, &[1]).expect_err("core 1 accepted");
        assert_eq!(err.kind(), &ErrorKind::CoreOutOfRange);
    }

    #[test]
    fn test_read_before_init() {
        let pmu = driver(4);
        assert_eq!(pmu.read_counter(0, 0), INVALID_COUNTER_VALUE);
        pmu.start(0);
        assert_eq!(pmu.registers().control() & PMCR_E, 0);
    }

    #[test]
    fn test_start_stop() {
        let pmu = driver(4);
        pmu.init(0, &[1]).expect("init failed");

        pmu.registers().tick(100);
        assert_eq!(pmu.read_counter(0, 1), 0);

        pmu.start(0);
        pmu.registers().tick(100);
        assert_eq!(pmu.read_counter(0, 1), 100);
        assert_eq!(pmu.read_counter(0, 0), 100);

        pmu.stop(0);
        pmu.registers().tick(100);
        assert_eq!(pmu.read_counter(0, 1), 100);

        // An idle counter reads the same value again
        assert_eq!(pmu.read_counter(0, 1), 100);
    }

    #[test]
    fn test_overflow_is_carried_into_high_word() {
        let pmu = driver(4);
        pmu.init(0, &[1]).expect("init failed");
        pmu.start(0);

        let regs = pmu.registers();
        regs.set_counter(0, 0xffff_fff0);
        assert_eq!(pmu.read_counter(0, 1), 0xffff_fff0);

        regs.advance(0, 0x20);
        assert_eq!(pmu.read_counter(0, 1), WRAP + 0x10);
        assert_eq!(regs.overflow_flags() & 1, 0);

        regs.advance(0, 0xffff_fffa);
        assert_eq!(pmu.read_counter(0, 1), 2 * WRAP + 10);
    }

    #[test]
    fn test_reads_are_monotonic_across_threads() {
        let pmu = driver(4);
        pmu.init(0, &[1]).expect("init failed");
        pmu.start(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut last = 0;
                    for _ in 0..500 {
                        pmu.registers().advance(0, 0x0100_0000);
                        let v = pmu.read_counter(0, 1);
                        assert!(v >= last);
                        last = v;
                    }
                });
            }
        });

        assert_eq!(pmu.read_counter(0, 1), 2000 * 0x0100_0000);
    }
}
