use super::{QueryResult, TranslationMap};
use crate::flags::PageFlags;
use crate::invalidation::Shootdown;
use crate::platform::Platform;
use kernel_memory_addresses::VirtualAddress;

/// The operations that are safe with interrupts disabled.
///
/// None of them takes the map lock, allocates, or waits for other CPUs.
pub trait NonBlockingTranslationMap {
    fn query(&self, va: VirtualAddress) -> QueryResult;

    /// [`query`](Self::query) for callers that already run with interrupts
    /// disabled and cannot be migrated.
    fn query_interrupt(&self, va: VirtualAddress) -> QueryResult;

    /// Set [`PageFlags::ACCESSED`] and/or [`PageFlags::MODIFIED`] on the
    /// translation of `va`, as a fault handler does on harts that do not
    /// update `A`/`D` in hardware. Other flags are ignored.
    ///
    /// The current hart re-walks after the fault, so only the other harts
    /// running this map are told to drop the page.
    fn set_flags(&self, va: VirtualAddress, flags: PageFlags);
}

impl<P: Platform, const N: usize> NonBlockingTranslationMap for TranslationMap<'_, P, N> {
    fn query(&self, va: VirtualAddress) -> QueryResult {
        TranslationMap::query(self, va)
    }

    fn query_interrupt(&self, va: VirtualAddress) -> QueryResult {
        self.query_unpinned(va)
    }

    fn set_flags(&self, va: VirtualAddress, flags: PageFlags) {
        let Some(slot) = self.walker().lookup(va) else {
            return;
        };
        if slot.fetch_or_valid(flags.usage_bits()).is_none() {
            return;
        }

        let targets = self.remote_targets(self.platform.current_cpu());
        if !targets.is_empty() {
            self.platform
                .send_shootdown(targets, &Shootdown::Pages(&[va.page_base()]));
        }
    }
}

/// The view of a translation map handed to interrupt handlers.
///
/// Only the [`NonBlockingTranslationMap`] operations are reachable through
/// it.
pub struct InterruptContext<'a, T: NonBlockingTranslationMap + ?Sized> {
    map: &'a T,
}

impl<'a, T: NonBlockingTranslationMap + ?Sized> InterruptContext<'a, T> {
    #[inline]
    pub const fn new(map: &'a T) -> Self {
        Self { map }
    }

    #[inline]
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> QueryResult {
        self.map.query_interrupt(va)
    }

    #[inline]
    pub fn set_flags(&self, va: VirtualAddress, flags: PageFlags) {
        self.map.set_flags(va, flags);
    }
}

impl<P: Platform, const N: usize> TranslationMap<'_, P, N> {
    /// The interrupt-safe view of this map.
    #[inline]
    pub const fn interrupt_context(&self) -> InterruptContext<'_, Self> {
        InterruptContext::new(self)
    }
}
