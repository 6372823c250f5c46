//! The machine services a translation map depends on.
//!
//! Everything hart-specific is behind [`Platform`]: which CPU and thread is
//! running, local TLB and instruction-cache maintenance, inter-processor
//! shootdowns, and access to physical memory and the page allocator. The
//! kernel implements it on top of `sfence.vma` and SBI IPIs; host tests
//! implement it with a recorder.

use crate::cpu_set::{CpuId, CpuSet};
use crate::invalidation::Shootdown;
use core::num::NonZeroU64;
use kernel_alloc::PhysicalPageAllocator;
use kernel_alloc::phys_mapper::PhysMapper;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::fence;
use kernel_registers::satp::Satp;
use kernel_sync::InterruptControl;

/// Per-machine hooks used by [`TranslationMap`](crate::TranslationMap).
///
/// The TLB methods have defaults issuing the matching `sfence.vma` on the
/// current hart, which is what a kernel build wants.
pub trait Platform: InterruptControl {
    type Mapper: PhysMapper;
    type Allocator: PhysicalPageAllocator;

    /// Access to page-table nodes in physical memory.
    fn phys_mapper(&self) -> &Self::Mapper;

    /// Source of page-table nodes.
    fn page_allocator(&self) -> &Self::Allocator;

    /// The hart executing the caller. Stable only while pinned.
    fn current_cpu(&self) -> CpuId;

    /// Number of harts online, numbered `0..cpu_count()`.
    fn cpu_count(&self) -> usize;

    /// Opaque non-zero token of the running thread, used as lock owner.
    fn current_thread(&self) -> NonZeroU64;

    /// Keep the running thread on its current hart until unpinned.
    /// Calls nest.
    fn pin_current_thread(&self);

    fn unpin_current_thread(&self);

    /// The `satp` value live on the current hart.
    fn current_satp(&self) -> Satp;

    /// Drop cached translations of `pages` on the current hart.
    fn invalidate_local_pages(&self, pages: &[VirtualAddress]) {
        for va in pages {
            // SAFETY: translation maps only run in supervisor mode.
            unsafe { fence::sfence_vma_page(va.as_u64()) };
        }
    }

    /// Drop all cached translations on the current hart. Without
    /// `include_global` only the current address space is affected.
    fn invalidate_local_all(&self, include_global: bool) {
        if include_global {
            // SAFETY: translation maps only run in supervisor mode.
            unsafe { fence::sfence_vma_all() };
        } else {
            // SAFETY: as above.
            unsafe { fence::sfence_vma_asid(self.current_satp().asid()) };
        }
    }

    /// Synchronize instruction fetch with earlier stores on the current hart.
    fn fence_instructions_local(&self) {
        // SAFETY: `fence.i` has no preconditions.
        unsafe { fence::fence_i() };
    }

    /// Deliver `request` to every hart in `targets`. Delivery may complete
    /// asynchronously.
    fn send_shootdown(&self, targets: CpuSet, request: &Shootdown<'_>);

    /// All harts online.
    fn all_cpus(&self) -> CpuSet {
        CpuSet::first(self.cpu_count())
    }
}

/// Pins the running thread to its hart for the guard's lifetime.
pub struct CpuPinner<'a, P: Platform + ?Sized> {
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> CpuPinner<'a, P> {
    #[inline]
    pub fn new(platform: &'a P) -> Self {
        platform.pin_current_thread();
        Self { platform }
    }

    /// The hart the thread is pinned to.
    #[inline]
    #[must_use]
    pub fn cpu(&self) -> CpuId {
        self.platform.current_cpu()
    }
}

impl<P: Platform + ?Sized> Drop for CpuPinner<'_, P> {
    #[inline]
    fn drop(&mut self) {
        self.platform.unpin_current_thread();
    }
}
