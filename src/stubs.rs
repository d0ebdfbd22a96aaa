#![allow(dead_code)]

pub unsafe fn read_cntvct_el0() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_midr_el1() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_mpidr_el1() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_ctr_el0() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_pmcr_el0() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmcr_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmcntenset_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmcntenclr_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmintenset_el1(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmintenclr_el1(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_pmovsclr_el0() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmovsclr_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmselr_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmxevtyper_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_pmxevcntr_el0() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmccfiltr_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_pmccntr_el0() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn write_pmuserenr_el0(_value: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn disable_interrupts_local() -> u64 {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn restore_interrupts_local(_daif: u64) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn dc_cvac(_address: usize) {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn wfi() {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn wfe() {
    unimplemented!("only implemented on AArch64")
}

pub unsafe fn read_lr() -> usize {
    unimplemented!("only implemented on AArch64")
}
