use crate::atomic;

#[cfg(target_arch = "aarch64")]
use crate::sysreg::*;

#[cfg(not(target_arch = "aarch64"))]
use crate::stubs::*;

/// Access to the PMU registers of the calling core.
///
/// Counter numbers are hardware numbers: event counters are `0..N` and the
/// cycle counter is 31.
pub trait PmuRegisters: Sync {
    /// Read the control register (PMCR).
    fn read_control(&self) -> u32;

    /// Write the control register (PMCR).
    fn write_control(&self, value: u32);

    /// Set counter enable bits (PMCNTENSET).
    fn enable_counters(&self, mask: u32);

    /// Clear counter enable bits (PMCNTENCLR).
    fn disable_counters(&self, mask: u32);

    /// Set overflow interrupt enable bits (PMINTENSET).
    fn enable_interrupts(&self, mask: u32);

    /// Clear overflow interrupt enable bits (PMINTENCLR).
    fn disable_interrupts(&self, mask: u32);

    /// Read the overflow flags (PMOVSR).
    fn read_overflow(&self) -> u32;

    /// Clear the overflow flags in `mask`.
    fn clear_overflow(&self, mask: u32);

    /// Set the event type of an event counter (PMEVTYPER).
    fn write_event_type(&self, counter: u32, value: u32);

    /// Set the cycle counter filter (PMCCFILTR).
    fn write_cycle_filter(&self, value: u32);

    /// Read the low 32 bits of an event counter (PMEVCNTR).
    fn read_event_counter(&self, counter: u32) -> u32;

    /// Read the low 32 bits of the cycle counter (PMCCNTR).
    fn read_cycle_counter(&self) -> u32;

    /// Read the full cycle counter where the hardware provides 64 bits.
    fn read_cycle_counter_64(&self) -> Option<u64> {
        None
    }

    /// Write the user enable register (PMUSERENR).
    fn write_user_enable(&self, value: u32);

    /// Synchronise the register writes.
    fn isb(&self) {
        atomic::isb()
    }
}

/// The AArch64 PMUv3 system registers.
///
/// Event counters are selected through `PMSELR_EL0`, which is shared state;
/// selection and access happen with interrupts masked.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRegisters;

impl PmuRegisters for SystemRegisters {
    fn read_control(&self) -> u32 {
        unsafe { read_pmcr_el0() as u32 }
    }

    fn write_control(&self, value: u32) {
        unsafe { write_pmcr_el0(value as u64) }
    }

    fn enable_counters(&self, mask: u32) {
        unsafe { write_pmcntenset_el0(mask as u64) }
    }

    fn disable_counters(&self, mask: u32) {
        unsafe { write_pmcntenclr_el0(mask as u64) }
    }

    fn enable_interrupts(&self, mask: u32) {
        unsafe { write_pmintenset_el1(mask as u64) }
    }

    fn disable_interrupts(&self, mask: u32) {
        unsafe { write_pmintenclr_el1(mask as u64) }
    }

    fn read_overflow(&self) -> u32 {
        unsafe { read_pmovsclr_el0() as u32 }
    }

    fn clear_overflow(&self, mask: u32) {
        unsafe { write_pmovsclr_el0(mask as u64) }
    }

    fn write_event_type(&self, counter: u32, value: u32) {
        unsafe {
            let daif = disable_interrupts_local();
            write_pmselr_el0(counter as u64);
            atomic::isb();
            write_pmxevtyper_el0(value as u64);
            restore_interrupts_local(daif);
        }
    }

    fn write_cycle_filter(&self, value: u32) {
        unsafe { write_pmccfiltr_el0(value as u64) }
    }

    fn read_event_counter(&self, counter: u32) -> u32 {
        unsafe {
            let daif = disable_interrupts_local();
            write_pmselr_el0(counter as u64);
            atomic::isb();
            let value = read_pmxevcntr_el0();
            restore_interrupts_local(daif);
            value as u32
        }
    }

    fn read_cycle_counter(&self) -> u32 {
        unsafe { read_pmccntr_el0() as u32 }
    }

    fn read_cycle_counter_64(&self) -> Option<u64> {
        Some(unsafe { read_pmccntr_el0() })
    }

    fn write_user_enable(&self, value: u32) {
        unsafe { write_pmuserenr_el0(value as u64) }
    }
}
