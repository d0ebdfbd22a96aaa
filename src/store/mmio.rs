//! Volatile access to memory mapped trace registers.

use std::ptr;

#[inline]
pub(crate) unsafe fn read32(address: usize) -> u32 {
    ptr::read_volatile(address as *const u32)
}

#[inline]
pub(crate) unsafe fn write32(address: usize, value: u32) {
    ptr::write_volatile(address as *mut u32, value)
}

#[inline]
pub(crate) unsafe fn write16(address: usize, value: u16) {
    ptr::write_volatile(address as *mut u16, value)
}

#[inline]
pub(crate) unsafe fn write8(address: usize, value: u8) {
    ptr::write_volatile(address as *mut u8, value)
}

/// Read-modify-write a 32-bit register.
#[inline]
pub(crate) unsafe fn modify32<F: FnOnce(u32) -> u32>(address: usize, f: F) {
    write32(address, f(read32(address)))
}

/// Unlock a CoreSight component's configuration registers.
pub(crate) unsafe fn unlock(base: usize) {
    const LAR: usize = 0xfb0;
    const KEY: u32 = 0xc5ac_ce55;

    write32(base + LAR, KEY)
}
