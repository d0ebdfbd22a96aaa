//! A software model of the PMUv3 register file.
//!
//! [`SimulatedPmu`] implements [`PmuRegisters`] so [`ArmPmu`] can be driven on
//! a host. Counters only advance when told to, which makes the overflow
//! handling reproducible.
//!
//! [`ArmPmu`]: ../struct.ArmPmu.html

use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::atomic::AtomicInt;

use super::{PmuRegisters, MAX_PMU_COUNTERS};

const CYCLE_COUNTER: usize = 31;
const PMCR_E: u32 = 1 << 0;
const PMCR_P: u32 = 1 << 1;
const PMCR_C: u32 = 1 << 2;
const PMCR_N_SHIFT: u32 = 11;

// Each counter word holds the 32-bit count with the overflow flag in bit 32
// so that wrapping and flagging happen in one step, as in hardware.
const OVERFLOW: u64 = 1 << 32;
const LOW: u64 = 0xffff_ffff;

/// A simulated PMU with a configurable number of event counters plus the
/// cycle counter.
#[derive(Debug)]
pub struct SimulatedPmu {
    n_counters: u32,
    control: AtomicU32,
    enabled: AtomicU32,
    interrupts: AtomicU32,
    user_enable: AtomicU32,
    cycle_filter: AtomicU32,
    event_types: [AtomicU32; MAX_PMU_COUNTERS],
    counters: [AtomicU64; MAX_PMU_COUNTERS],
}

impl SimulatedPmu {
    /// A PMU with `n_counters` event counters (at most 31).
    pub fn new(n_counters: u32) -> Self {
        Self {
            n_counters: n_counters.min(CYCLE_COUNTER as u32),
            control: AtomicU32::new(0),
            enabled: AtomicU32::new(0),
            interrupts: AtomicU32::new(0),
            user_enable: AtomicU32::new(0),
            cycle_filter: AtomicU32::new(0),
            event_types: Default::default(),
            counters: Default::default(),
        }
    }

    fn counting(&self, hw: usize) -> bool {
        self.control.atomic_load() & PMCR_E != 0 && self.enabled.atomic_load() & (1 << hw) != 0
    }

    /// Advance hardware counter `hw` (31 for the cycle counter) by `delta`
    /// events if it is enabled, setting its overflow flag if it wraps.
    pub fn advance(&self, hw: u32, delta: u32) {
        let hw = hw as usize;
        if !self.counting(hw) {
            return;
        }

        let word = &self.counters[hw];
        let mut current = word.atomic_load();
        loop {
            let low = current & LOW;
            let sum = low + delta as u64;
            let mut next = (current & OVERFLOW) | (sum & LOW);
            if sum > LOW {
                next |= OVERFLOW;
            }

            if word.atomic_cas_weak(&mut current, next) {
                return;
            }
        }
    }

    /// Advance every enabled counter by `delta`.
    pub fn tick(&self, delta: u32) {
        for hw in 0..self.n_counters {
            self.advance(hw, delta);
        }
        self.advance(CYCLE_COUNTER as u32, delta);
    }

    /// Overwrite the 32-bit value of counter `hw`, clearing its overflow flag.
    pub fn set_counter(&self, hw: u32, value: u32) {
        self.counters[hw as usize].atomic_store(value as u64);
    }

    /// The 32-bit value of counter `hw`.
    pub fn counter(&self, hw: u32) -> u32 {
        (self.counters[hw as usize].atomic_load() & LOW) as u32
    }

    /// The event type programmed into counter `hw`.
    pub fn event_type(&self, hw: u32) -> u32 {
        self.event_types[hw as usize].atomic_load()
    }

    /// The counter enable mask.
    pub fn enabled_counters(&self) -> u32 {
        self.enabled.atomic_load()
    }

    /// The overflow interrupt enable mask.
    pub fn enabled_interrupts(&self) -> u32 {
        self.interrupts.atomic_load()
    }

    /// The overflow flags of all counters.
    pub fn overflow_flags(&self) -> u32 {
        self.counters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.atomic_load() & OVERFLOW != 0)
            .fold(0, |flags, (hw, _)| flags | 1 << hw)
    }

    /// The control register without the counter count field.
    pub fn control(&self) -> u32 {
        self.control.atomic_load()
    }

    /// The user enable register.
    pub fn user_enable(&self) -> u32 {
        self.user_enable.atomic_load()
    }

    /// The cycle counter filter register.
    pub fn cycle_filter(&self) -> u32 {
        self.cycle_filter.atomic_load()
    }
}

impl PmuRegisters for SimulatedPmu {
    fn read_control(&self) -> u32 {
        self.control.atomic_load() | self.n_counters << PMCR_N_SHIFT
    }

    fn write_control(&self, value: u32) {
        if value & PMCR_P != 0 {
            for c in &self.counters[..CYCLE_COUNTER] {
                c.atomic_and_fetch(OVERFLOW);
            }
        }
        if value & PMCR_C != 0 {
            self.counters[CYCLE_COUNTER].atomic_and_fetch(OVERFLOW);
        }
        self.control.atomic_store(value & !(PMCR_P | PMCR_C));
    }

    fn enable_counters(&self, mask: u32) {
        self.enabled.atomic_fetch_or(mask);
    }

    fn disable_counters(&self, mask: u32) {
        self.enabled.atomic_fetch_and(!mask);
    }

    fn enable_interrupts(&self, mask: u32) {
        self.interrupts.atomic_fetch_or(mask);
    }

    fn disable_interrupts(&self, mask: u32) {
        self.interrupts.atomic_fetch_and(!mask);
    }

    fn read_overflow(&self) -> u32 {
        self.overflow_flags()
    }

    fn clear_overflow(&self, mask: u32) {
        for (hw, c) in self.counters.iter().enumerate() {
            if mask & (1 << hw) != 0 {
                c.atomic_fetch_and(LOW);
            }
        }
    }

    fn write_event_type(&self, counter: u32, value: u32) {
        if counter < self.n_counters {
            self.event_types[counter as usize].atomic_store(value);
        }
    }

    fn write_cycle_filter(&self, value: u32) {
        self.cycle_filter.atomic_store(value);
    }

    fn read_event_counter(&self, counter: u32) -> u32 {
        if counter < self.n_counters {
            self.counter(counter)
        } else {
            0
        }
    }

    fn read_cycle_counter(&self) -> u32 {
        self.counter(CYCLE_COUNTER as u32)
    }

    fn write_user_enable(&self, value: u32) {
        self.user_enable.atomic_store(value);
    }
}

impl<'a, R> PmuRegisters for &'a R
where
    R: PmuRegisters,
{
    fn read_control(&self) -> u32 {
        (**self).read_control()
    }
    fn write_control(&self, value: u32) {
        (**self).write_control(value)
    }
    fn enable_counters(&self, mask: u32) {
        (**self).enable_counters(mask)
    }
    fn disable_counters(&self, mask: u32) {
        (**self).disable_counters(mask)
    }
    fn enable_interrupts(&self, mask: u32) {
        (**self).enable_interrupts(mask)
    }
    fn disable_interrupts(&self, mask: u32) {
        (**self).disable_interrupts(mask)
    }
    fn read_overflow(&self) -> u32 {
        (**self).read_overflow()
    }
    fn clear_overflow(&self, mask: u32) {
        (**self).clear_overflow(mask)
    }
    fn write_event_type(&self, counter: u32, value: u32) {
        (**self).write_event_type(counter, value)
    }
    fn write_cycle_filter(&self, value: u32) {
        (**self).write_cycle_filter(value)
    }
    fn read_event_counter(&self, counter: u32) -> u32 {
        (**self).read_event_counter(counter)
    }
    fn read_cycle_counter(&self) -> u32 {
        (**self).read_cycle_counter()
    }
    fn read_cycle_counter_64(&self) -> Option<u64> {
        (**self).read_cycle_counter_64()
    }
    fn write_user_enable(&self, value: u32) {
        (**self).write_user_enable(value)
    }
    fn isb(&self) {
        (**self).isb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_when_enabled() {
        let pmu = SimulatedPmu::new(2);
        pmu.tick(5);
        assert_eq!(pmu.counter(0), 0);

        pmu.enable_counters(0b1);
        pmu.tick(5);
        assert_eq!(pmu.counter(0), 0);

        pmu.write_control(PMCR_E);
        pmu.tick(5);
        assert_eq!(pmu.counter(0), 5);
        assert_eq!(pmu.counter(1), 0);
    }

    #[test]
    fn test_wrap_sets_overflow() {
        let pmu = SimulatedPmu::new(1);
        pmu.enable_counters(1 << 31);
        pmu.write_control(PMCR_E);

        pmu.set_counter(31, 0xffff_ffff);
        pmu.advance(31, 2);
        assert_eq!(pmu.read_cycle_counter(), 1);
        assert_eq!(pmu.read_overflow(), 1 << 31);

        pmu.clear_overflow(1 << 31);
        assert_eq!(pmu.read_overflow(), 0);
        assert_eq!(pmu.read_cycle_counter(), 1);
    }

    #[test]
    fn test_control_reports_counter_count() {
        let pmu = SimulatedPmu::new(6);
        assert_eq!((pmu.read_control() >> PMCR_N_SHIFT) & 0x1f, 6);
        assert_eq!(SimulatedPmu::new(40).read_control() >> PMCR_N_SHIFT, 31);
    }

    #[test]
    fn test_control_reset_bits() {
        let pmu = SimulatedPmu::new(2);
        pmu.set_counter(1, 9);
        pmu.set_counter(31, 9);

        pmu.write_control(PMCR_P);
        assert_eq!(pmu.counter(1), 0);
        assert_eq!(pmu.counter(31), 9);

        pmu.write_control(PMCR_C);
        assert_eq!(pmu.counter(31), 0);
        assert_eq!(pmu.control(), 0);
    }
}
