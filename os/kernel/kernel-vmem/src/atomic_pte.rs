//! Lock-free access to a single table slot.

use crate::pte::{Pte, PteFlags};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// A page-table slot that may be read and updated concurrently.
///
/// The MMU sets `A`/`D` behind our back and protection changes run without
/// the map lock, so every access goes through an atomic operation. Writes
/// publish with `Release` so that a table page zeroed before its pointer is
/// installed is seen zeroed by lock-free walkers.
#[repr(transparent)]
#[derive(Default)]
pub struct AtomicPte(AtomicU64);

impl AtomicPte {
    #[inline]
    #[must_use]
    pub const fn new(pte: Pte) -> Self {
        Self(AtomicU64::new(pte.into_bits()))
    }

    #[inline]
    #[must_use]
    pub fn load(&self) -> Pte {
        Pte::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, pte: Pte) {
        self.0.store(pte.into_bits(), Ordering::Release);
    }

    /// Replace the entry, returning the previous one.
    #[inline]
    pub fn swap(&self, pte: Pte) -> Pte {
        Pte::from_bits(self.0.swap(pte.into_bits(), Ordering::AcqRel))
    }

    /// Install `new` if the slot still holds `current`.
    ///
    /// # Errors
    /// The value actually found, if it differed from `current`.
    #[inline]
    pub fn compare_exchange(&self, current: Pte, new: Pte) -> Result<Pte, Pte> {
        self.0
            .compare_exchange(current.into_bits(), new.into_bits(), Ordering::AcqRel, Ordering::Acquire)
            .map(Pte::from_bits)
            .map_err(Pte::from_bits)
    }

    /// Set `flags`, returning the previous entry.
    #[inline]
    pub fn fetch_or(&self, flags: PteFlags) -> Pte {
        Pte::from_bits(self.0.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Set `flags` while the slot is valid. An invalid slot is left at
    /// zero and `None` is returned.
    #[inline]
    pub fn fetch_or_valid(&self, flags: PteFlags) -> Option<Pte> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (raw & PteFlags::VALID.bits() != 0).then_some(raw | flags.bits())
            })
            .ok()
            .map(Pte::from_bits)
    }

    /// Clear `flags`, returning the previous entry.
    #[inline]
    pub fn fetch_clear(&self, flags: PteFlags) -> Pte {
        Pte::from_bits(self.0.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    /// Invalidate the slot, returning what it held.
    #[inline]
    pub fn take(&self) -> Pte {
        self.swap(Pte::ZERO)
    }
}

impl fmt::Debug for AtomicPte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(), f)
    }
}
