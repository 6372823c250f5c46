//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: test-and-test-and-set lock owning its data, optionally
//!   taken with interrupts disabled ([`SpinLock::lock_irq`]).
//! * [`RecursiveLock`]: re-entrant lock keyed by an owner token over a
//!   [`RawSpin`] word.
//! * [`InterruptControl`] / [`IrqGuard`]: scoped interrupt masking.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod raw_spin;
mod recursive;
mod spin_lock;

pub use irq::{InterruptControl, IrqGuard, IrqSpinLockGuard};
pub use raw_spin::RawSpin;
pub use recursive::RecursiveLock;
pub use spin_lock::{SpinLock, SpinLockGuard};

/// A raw lock word, as used by [`RecursiveLock`].
pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The caller must hold the lock.
    unsafe fn raw_unlock(&self);
}
