use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// Local interrupt masking for the current CPU.
///
/// Implemented by the platform layer; tests use a recording fake. On RISC-V
/// the kernel implementation is [`SupervisorInterrupts`].
pub trait InterruptControl {
    /// Disable interrupts on the current CPU and return whether they were
    /// enabled before.
    fn disable_interrupts(&self) -> bool;

    /// Re-enable interrupts on the current CPU if `were_enabled`.
    fn restore_interrupts(&self, were_enabled: bool);

    /// Returns `true` if interrupts are currently enabled on this CPU.
    fn interrupts_enabled(&self) -> bool;
}

impl<I: InterruptControl + ?Sized> InterruptControl for &I {
    #[inline]
    fn disable_interrupts(&self) -> bool {
        (**self).disable_interrupts()
    }

    #[inline]
    fn restore_interrupts(&self, were_enabled: bool) {
        (**self).restore_interrupts(were_enabled);
    }

    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt-enable state. On drop, interrupts
/// are re-enabled **only** if they were enabled before, so guards nest.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::irq::{IrqGuard, SupervisorInterrupts};
///
/// {
///     let _g = IrqGuard::new(&SupervisorInterrupts); // interrupts disabled
///     // critical section
/// }
/// // previous state restored
/// ```
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    ctl: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    #[inline]
    #[must_use]
    pub fn new(ctl: &'a I) -> Self {
        let were_enabled = ctl.disable_interrupts();
        Self { ctl, were_enabled }
    }

    /// Whether interrupts were enabled when this guard was created.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        self.ctl.restore_interrupts(self.were_enabled);
    }
}

/// A [`SpinLock`] guard that also keeps interrupts disabled while held.
///
/// Created via [`SpinLock::lock_irq`]. Interrupts are disabled before the
/// lock is taken and restored after it is released, so an interrupt handler
/// on the same CPU can never spin on a lock its own CPU holds.
pub struct IrqSpinLockGuard<'a, T, I: InterruptControl + ?Sized> {
    // Field order matters: the lock is released before interrupts are restored.
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<'a, I>,
}

impl<T> SpinLock<T> {
    /// Acquires the lock with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq<'a, I: InterruptControl + ?Sized>(
        &'a self,
        ctl: &'a I,
    ) -> IrqSpinLockGuard<'a, T, I> {
        let irq = IrqGuard::new(ctl);
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }
}

impl<T, I: InterruptControl + ?Sized> Deref for IrqSpinLockGuard<'_, T, I> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, I: InterruptControl + ?Sized> DerefMut for IrqSpinLockGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// `sstatus.SIE` based interrupt control for the current hart.
///
/// # Safety & Privilege
///
/// Only meaningful in supervisor mode on `riscv64`. On other targets every
/// operation is a no-op and interrupts are reported as disabled.
#[derive(Debug, Default, Copy, Clone)]
pub struct SupervisorInterrupts;

impl InterruptControl for SupervisorInterrupts {
    #[inline]
    fn disable_interrupts(&self) -> bool {
        sie::clear()
    }

    #[inline]
    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            sie::set();
        }
    }

    #[inline]
    fn interrupts_enabled(&self) -> bool {
        sie::read()
    }
}

#[cfg(target_arch = "riscv64")]
mod sie {
    const SSTATUS_SIE: u64 = 1 << 1;

    #[inline]
    pub fn clear() -> bool {
        let prev: u64;
        unsafe {
            core::arch::asm!("csrrc {}, sstatus, {}", out(reg) prev, in(reg) SSTATUS_SIE, options(nostack, preserves_flags));
        }
        prev & SSTATUS_SIE != 0
    }

    #[inline]
    pub fn set() {
        unsafe {
            core::arch::asm!("csrs sstatus, {}", in(reg) SSTATUS_SIE, options(nostack, preserves_flags));
        }
    }

    #[inline]
    pub fn read() -> bool {
        let v: u64;
        unsafe {
            core::arch::asm!("csrr {}, sstatus", out(reg) v, options(nomem, nostack, preserves_flags));
        }
        v & SSTATUS_SIE != 0
    }
}

#[cfg(not(target_arch = "riscv64"))]
mod sie {
    #[inline]
    pub const fn clear() -> bool {
        false
    }

    #[inline]
    pub const fn set() {}

    #[inline]
    pub const fn read() -> bool {
        false
    }
}
