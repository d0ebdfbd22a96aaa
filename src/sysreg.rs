//! AArch64 system register accessors.
//!
//! Every function is `unsafe`: reading or writing these registers traps
//! when the current exception level has not been granted access.

#![allow(dead_code)]

use core::arch::asm;

macro_rules! read_sysreg {
    ($name:ident, $reg:literal) => {
        #[inline(always)]
        pub unsafe fn $name() -> u64 {
            let value: u64;
            asm!(concat!("mrs {}, ", $reg), out(reg) value, options(nomem, nostack, preserves_flags));
            value
        }
    };
}

macro_rules! write_sysreg {
    ($name:ident, $reg:literal) => {
        #[inline(always)]
        pub unsafe fn $name(value: u64) {
            asm!(concat!("msr ", $reg, ", {}"), in(reg) value, options(nostack, preserves_flags));
        }
    };
}

read_sysreg!(read_cntvct_el0, "cntvct_el0");
read_sysreg!(read_midr_el1, "midr_el1");
read_sysreg!(read_mpidr_el1, "mpidr_el1");
read_sysreg!(read_ctr_el0, "ctr_el0");
read_sysreg!(read_daif, "daif");
write_sysreg!(write_daif, "daif");

read_sysreg!(read_pmcr_el0, "pmcr_el0");
write_sysreg!(write_pmcr_el0, "pmcr_el0");
write_sysreg!(write_pmcntenset_el0, "pmcntenset_el0");
write_sysreg!(write_pmcntenclr_el0, "pmcntenclr_el0");
write_sysreg!(write_pmintenset_el1, "pmintenset_el1");
write_sysreg!(write_pmintenclr_el1, "pmintenclr_el1");
read_sysreg!(read_pmovsclr_el0, "pmovsclr_el0");
write_sysreg!(write_pmovsclr_el0, "pmovsclr_el0");
write_sysreg!(write_pmselr_el0, "pmselr_el0");
write_sysreg!(write_pmxevtyper_el0, "pmxevtyper_el0");
read_sysreg!(read_pmxevcntr_el0, "pmxevcntr_el0");
write_sysreg!(write_pmccfiltr_el0, "pmccfiltr_el0");
read_sysreg!(read_pmccntr_el0, "pmccntr_el0");
write_sysreg!(write_pmuserenr_el0, "pmuserenr_el0");

/// Mask IRQ and FIQ on the current core, returning the previous mask.
#[inline(always)]
pub unsafe fn disable_interrupts_local() -> u64 {
    let daif = read_daif();
    asm!("msr daifset, #3", options(nostack, preserves_flags));
    daif
}

/// Restore a mask returned by [`disable_interrupts_local`].
#[inline(always)]
pub unsafe fn restore_interrupts_local(daif: u64) {
    write_daif(daif)
}

/// Clean the data cache line containing `address` to the point of coherency.
#[inline(always)]
pub unsafe fn dc_cvac(address: usize) {
    asm!("dc cvac, {}", in(reg) address, options(nostack, preserves_flags));
}

#[inline(always)]
pub unsafe fn wfi() {
    asm!("wfi", options(nomem, nostack, preserves_flags));
}

#[inline(always)]
pub unsafe fn wfe() {
    asm!("wfe", options(nomem, nostack, preserves_flags));
}

/// The link register of the function this is inlined into.
#[inline(always)]
pub unsafe fn read_lr() -> usize {
    let lr: usize;
    asm!("mov {}, x30", out(reg) lr, options(nomem, nostack, preserves_flags));
    lr
}
