//! Atomic operations and memory barriers used by every shared structure in
//! the crate.
//!
//! The [`AtomicInt`] trait bakes the memory orderings into the operation so
//! call sites read like the algorithm rather than like a list of orderings:
//! loads acquire, stores release, and every read-modify-write is
//! acquire-release. Compare-and-swap comes in the C flavour where the expected
//! value is updated in place on failure, which keeps CAS-retry loops short.

use std::sync::atomic::{
	compiler_fence, fence, AtomicU16, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

/// Integer atomics with acquire/release semantics.
pub trait AtomicInt {
	/// The integer type held by the atomic.
	type Value: Copy + PartialOrd;

	/// Load with acquire ordering.
	fn atomic_load(&self) -> Self::Value;

	/// Store with release ordering.
	fn atomic_store(&self, value: Self::Value);

	/// Swap the value, returning the previous one.
	fn atomic_exchange(&self, value: Self::Value) -> Self::Value;

	/// Strong compare-and-swap.
	///
	/// On failure `expected` is updated to the value observed.
	fn atomic_cas_strong(&self, expected: &mut Self::Value, new: Self::Value) -> bool;

	/// Weak compare-and-swap, may fail spuriously.
	///
	/// On failure `expected` is updated to the value observed.
	fn atomic_cas_weak(&self, expected: &mut Self::Value, new: Self::Value) -> bool;

	/// Strong compare-and-swap against a fixed expected value.
	fn atomic_cas_value(&self, expected: Self::Value, new: Self::Value) -> bool {
		let mut expected = expected;
		self.atomic_cas_strong(&mut expected, new)
	}

	/// Add, returning the previous value.
	fn atomic_fetch_add(&self, value: Self::Value) -> Self::Value;
	/// Subtract, returning the previous value.
	fn atomic_fetch_sub(&self, value: Self::Value) -> Self::Value;
	/// Bitwise and, returning the previous value.
	fn atomic_fetch_and(&self, value: Self::Value) -> Self::Value;
	/// Bitwise or, returning the previous value.
	fn atomic_fetch_or(&self, value: Self::Value) -> Self::Value;
	/// Bitwise xor, returning the previous value.
	fn atomic_fetch_xor(&self, value: Self::Value) -> Self::Value;

	/// Add, returning the new value.
	fn atomic_add_fetch(&self, value: Self::Value) -> Self::Value;
	/// Subtract, returning the new value.
	fn atomic_sub_fetch(&self, value: Self::Value) -> Self::Value;
	/// Bitwise and, returning the new value.
	fn atomic_and_fetch(&self, value: Self::Value) -> Self::Value;
	/// Bitwise or, returning the new value.
	fn atomic_or_fetch(&self, value: Self::Value) -> Self::Value;
	/// Bitwise xor, returning the new value.
	fn atomic_xor_fetch(&self, value: Self::Value) -> Self::Value;

	/// Raise the stored value to `value` if it is currently smaller.
	///
	/// Returns `true` if this call changed the value.
	fn atomic_raise_to(&self, value: Self::Value) -> bool {
		let mut current = self.atomic_load();
		while current < value {
			if self.atomic_cas_weak(&mut current, value) {
				return true;
			}
		}
		false
	}
}

macro_rules! impl_atomic_int {
	($atomic:ty, $value:ty) => {
		impl AtomicInt for $atomic {
			type Value = $value;

			#[inline]
			fn atomic_load(&self) -> $value {
				self.load(Ordering::Acquire)
			}

			#[inline]
			fn atomic_store(&self, value: $value) {
				self.store(value, Ordering::Release)
			}

			#[inline]
			fn atomic_exchange(&self, value: $value) -> $value {
				self.swap(value, Ordering::AcqRel)
			}

			#[inline]
			fn atomic_cas_strong(&self, expected: &mut $value, new: $value) -> bool {
				match self.compare_exchange(*expected, new, Ordering::AcqRel, Ordering::Acquire) {
					Ok(_) => true,
					Err(observed) => {
						*expected = observed;
						false
					}
				}
			}

			#[inline]
			fn atomic_cas_weak(&self, expected: &mut $value, new: $value) -> bool {
				match self.compare_exchange_weak(*expected, new, Ordering::AcqRel, Ordering::Acquire)
				{
					Ok(_) => true,
					Err(observed) => {
						*expected = observed;
						false
					}
				}
			}

			#[inline]
			fn atomic_fetch_add(&self, value: $value) -> $value {
				self.fetch_add(value, Ordering::AcqRel)
			}

			#[inline]
			fn atomic_fetch_sub(&self, value: $value) -> $value {
				self.fetch_sub(value, Ordering::AcqRel)
			}

			#[inline]
			fn atomic_fetch_and(&self, value: $value) -> $value {
				self.fetch_and(value, Ordering::AcqRel)
			}

			#[inline]
			fn atomic_fetch_or(&self, value: $value) -> $value {
				self.fetch_or(value, Ordering::AcqRel)
			}

			#[inline]
			fn atomic_fetch_xor(&self, value: $value) -> $value {
				self.fetch_xor(value, Ordering::AcqRel)
			}

			#[inline]
			fn atomic_add_fetch(&self, value: $value) -> $value {
				self.fetch_add(value, Ordering::AcqRel).wrapping_add(value)
			}

			#[inline]
			fn atomic_sub_fetch(&self, value: $value) -> $value {
				self.fetch_sub(value, Ordering::AcqRel).wrapping_sub(value)
			}

			#[inline]
			fn atomic_and_fetch(&self, value: $value) -> $value {
				self.fetch_and(value, Ordering::AcqRel) & value
			}

			#[inline]
			fn atomic_or_fetch(&self, value: $value) -> $value {
				self.fetch_or(value, Ordering::AcqRel) | value
			}

			#[inline]
			fn atomic_xor_fetch(&self, value: $value) -> $value {
				self.fetch_xor(value, Ordering::AcqRel) ^ value
			}
		}
	};
}

impl_atomic_int!(AtomicU8, u8);
impl_atomic_int!(AtomicU16, u16);
impl_atomic_int!(AtomicU32, u32);
impl_atomic_int!(AtomicU64, u64);
impl_atomic_int!(AtomicUsize, usize);

/// A monotonically increasing timestamp.
///
/// Targets without 64-bit atomics keep only the low 32 bits. This is
/// acceptable for fields that only ever increase and are only compared to
/// find out whether they changed; a wrap of the low word may then cause a
/// single update to be missed.
#[derive(Debug, Default)]
pub struct AtomicTimestamp {
	#[cfg(target_has_atomic = "64")]
	value: AtomicU64,
	#[cfg(not(target_has_atomic = "64"))]
	value: AtomicU32,
}

impl AtomicTimestamp {
	/// Create a timestamp holding `value`.
	pub const fn new(value: u64) -> Self {
		Self {
			#[cfg(target_has_atomic = "64")]
			value: AtomicU64::new(value),
			#[cfg(not(target_has_atomic = "64"))]
			value: AtomicU32::new(value as u32),
		}
	}

	/// Read the timestamp.
	#[inline]
	pub fn load(&self) -> u64 {
		self.value.atomic_load() as u64
	}

	/// Overwrite the timestamp.
	#[inline]
	pub fn store(&self, value: u64) {
		#[cfg(target_has_atomic = "64")]
		self.value.atomic_store(value);
		#[cfg(not(target_has_atomic = "64"))]
		self.value.atomic_store(value as u32);
	}

	/// Raise the timestamp to `value` if it is currently older.
	#[inline]
	pub fn raise_to(&self, value: u64) -> bool {
		#[cfg(target_has_atomic = "64")]
		return self.value.atomic_raise_to(value);
		#[cfg(not(target_has_atomic = "64"))]
		return self.value.atomic_raise_to(value as u32);
	}
}

/// Data memory barrier.
#[inline]
pub fn dmb() {
	#[cfg(target_arch = "aarch64")]
	unsafe {
		core::arch::asm!("dmb ish", options(nostack, preserves_flags))
	}
	#[cfg(not(target_arch = "aarch64"))]
	fence(Ordering::SeqCst);
}

/// Data synchronisation barrier.
#[inline]
pub fn dsb() {
	#[cfg(target_arch = "aarch64")]
	unsafe {
		core::arch::asm!("dsb sy", options(nostack, preserves_flags))
	}
	#[cfg(not(target_arch = "aarch64"))]
	fence(Ordering::SeqCst);
}

/// Instruction synchronisation barrier.
#[inline]
pub fn isb() {
	#[cfg(target_arch = "aarch64")]
	unsafe {
		core::arch::asm!("isb", options(nostack, preserves_flags))
	}
	#[cfg(not(target_arch = "aarch64"))]
	compiler_fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cas_updates_expected() {
		let v = AtomicU32::new(5);

		let mut expected = 4;
		assert!(!v.atomic_cas_strong(&mut expected, 9));
		assert_eq!(expected, 5);

		assert!(v.atomic_cas_strong(&mut expected, 9));
		assert_eq!(v.atomic_load(), 9);
	}

	#[test]
	fn test_op_and_fetch() {
		let v = AtomicUsize::new(0b1100);
		assert_eq!(v.atomic_and_fetch(0b0110), 0b0100);
		assert_eq!(v.atomic_or_fetch(0b0001), 0b0101);
		assert_eq!(v.atomic_xor_fetch(0b0101), 0);
		assert_eq!(v.atomic_add_fetch(7), 7);
		assert_eq!(v.atomic_sub_fetch(2), 5);
		assert_eq!(v.atomic_fetch_sub(5), 5);
	}

	#[test]
	fn test_raise_to_is_monotonic() {
		let v = AtomicU64::new(10);
		assert!(!v.atomic_raise_to(3));
		assert_eq!(v.atomic_load(), 10);
		assert!(v.atomic_raise_to(11));
		assert_eq!(v.atomic_load(), 11);
	}

	#[test]
	fn test_raise_to_concurrent() {
		let v = AtomicU64::new(0);

		std::thread::scope(|s| {
			for t in 0..4u64 {
				let v = &v;
				s.spawn(move || {
					for i in 0..1000u64 {
						v.atomic_raise_to(i * 4 + t);
					}
				});
			}
		});

		assert_eq!(v.atomic_load(), 3999);
	}

	#[test]
	fn test_timestamp() {
		let ts = AtomicTimestamp::new(42);
		assert!(!ts.raise_to(41));
		assert!(ts.raise_to(100));
		assert_eq!(ts.load(), 100);
		ts.store(1);
		assert_eq!(ts.load(), 1);
	}
}
