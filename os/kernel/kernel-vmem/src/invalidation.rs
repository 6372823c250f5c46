//! # TLB invalidation batching
//!
//! Changes that may leave stale translations behind queue the affected page
//! in an [`InvalidationBatch`] instead of fencing immediately. A flush
//! drains the batch into a [`DrainedBatch`], which names what the local hart
//! has to invalidate and what must be sent to other harts as a
//! [`Shootdown`].
//!
//! Up to `N` distinct pages are remembered. Queuing more than that sets the
//! overflow marker, and the flush turns into a full invalidation. A separate
//! flag records that an executable mapping changed, which additionally
//! requires an instruction-fetch fence.

use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Pending invalidations of one translation map.
pub struct InvalidationBatch<const N: usize> {
    pages: [VirtualAddress; N],
    /// Pages queued since the last drain; may exceed `N`.
    queued: usize,
    fence_instructions: bool,
}

impl<const N: usize> InvalidationBatch<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pages: [VirtualAddress::zero(); N],
            queued: 0,
            fence_instructions: false,
        }
    }

    /// Remember that `va` may be cached. A page already in the batch is
    /// not queued again.
    pub fn push(&mut self, va: VirtualAddress) {
        let base = va.page_base();
        if self.queued < N {
            if self.pages[..self.queued].contains(&base) {
                return;
            }
            self.pages[self.queued] = base;
        } else if self.queued == N && self.pages.contains(&base) {
            return;
        }
        self.queued = self.queued.saturating_add(1);
    }

    /// Request an instruction-fetch fence with the next flush.
    pub const fn mark_code_dirty(&mut self) {
        self.fence_instructions = true;
    }

    /// Number of distinct pages queued since the last drain. Once the batch
    /// has overflowed, every further push counts.
    #[must_use]
    pub const fn queued(&self) -> usize {
        self.queued
    }

    #[must_use]
    pub const fn is_overflowed(&self) -> bool {
        self.queued > N
    }

    /// Nothing to invalidate and no fence requested.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.queued == 0 && !self.fence_instructions
    }

    /// Turn the queued work into a plan and reset the batch.
    pub fn drain(&mut self) -> DrainedBatch<N> {
        let plan = match self.queued {
            0 => InvalidationPlan::None,
            n if n > N => InvalidationPlan::Global,
            n => InvalidationPlan::List(PageList { pages: self.pages, len: n }),
        };
        let fence_instructions = core::mem::take(&mut self.fence_instructions);
        self.queued = 0;
        DrainedBatch { plan, fence_instructions }
    }
}

impl<const N: usize> Default for InvalidationBatch<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for InvalidationBatch<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBatch")
            .field("pages", &&self.pages[..self.queued.min(N)])
            .field("queued", &self.queued)
            .field("fence_instructions", &self.fence_instructions)
            .finish()
    }
}

/// Up to `N` page addresses copied out of a batch.
#[derive(Clone, Copy)]
pub struct PageList<const N: usize> {
    pages: [VirtualAddress; N],
    len: usize,
}

impl<const N: usize> PageList<N> {
    #[must_use]
    pub fn as_slice(&self) -> &[VirtualAddress] {
        &self.pages[..self.len]
    }
}

impl<const N: usize> fmt::Debug for PageList<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// What a flush has to invalidate.
#[derive(Debug, Clone, Copy)]
pub enum InvalidationPlan<const N: usize> {
    None,
    /// Invalidate exactly these pages.
    List(PageList<N>),
    /// Too many pages were queued; invalidate everything.
    Global,
}

/// The result of [`InvalidationBatch::drain`].
#[derive(Debug, Clone, Copy)]
pub struct DrainedBatch<const N: usize> {
    pub plan: InvalidationPlan<N>,
    pub fence_instructions: bool,
}

impl<const N: usize> DrainedBatch<N> {
    /// Nothing needs to happen.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self.plan, InvalidationPlan::None) && !self.fence_instructions
    }
}

/// A request delivered to other harts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shootdown<'a> {
    /// Invalidate these pages.
    Pages(&'a [VirtualAddress]),
    /// Invalidate all translations; global ones only if `include_global`.
    All { include_global: bool },
    /// Execute `fence.i`.
    FenceInstructions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn va(n: u64) -> VirtualAddress {
        VirtualAddress::new(n * 0x1000)
    }

    #[test]
    fn empty_batch_drains_to_noop() {
        let mut batch = InvalidationBatch::<4>::new();
        assert!(batch.is_empty());
        assert!(batch.drain().is_noop());
    }

    #[test]
    fn list_keeps_order_and_page_bases() {
        let mut batch = InvalidationBatch::<4>::new();
        batch.push(VirtualAddress::new(0x3123));
        batch.push(va(1));
        let drained = batch.drain();
        let InvalidationPlan::List(pages) = drained.plan else {
            panic!("expected a page list, got {:?}", drained.plan);
        };
        assert_eq!(pages.as_slice(), &[va(3), va(1)]);
        assert!(!drained.fence_instructions);
        assert!(batch.is_empty());
    }

    #[test]
    fn exactly_full_batch_stays_a_list() {
        let mut batch = InvalidationBatch::<4>::new();
        (0..4).for_each(|n| batch.push(va(n)));
        assert!(!batch.is_overflowed());
        assert!(matches!(batch.drain().plan, InvalidationPlan::List(p) if p.as_slice().len() == 4));
    }

    #[test]
    fn overflow_becomes_global() {
        let mut batch = InvalidationBatch::<4>::new();
        (0..5).for_each(|n| batch.push(va(n)));
        assert!(batch.is_overflowed());
        assert_eq!(batch.queued(), 5);
        assert!(matches!(batch.drain().plan, InvalidationPlan::Global));
        assert_eq!(batch.queued(), 0);
    }

    #[test]
    fn repeated_page_is_queued_once() {
        let mut batch = InvalidationBatch::<4>::new();
        for offset in [0x000, 0x123, 0xfff, 0x000, 0x800] {
            batch.push(VirtualAddress::new(0x5000 + offset));
        }
        assert_eq!(batch.queued(), 1);
        assert!(!batch.is_overflowed());
        let InvalidationPlan::List(pages) = batch.drain().plan else {
            panic!("expected a page list");
        };
        assert_eq!(pages.as_slice(), &[va(5)]);
    }

    #[test]
    fn full_batch_ignores_pages_it_already_holds() {
        let mut batch = InvalidationBatch::<4>::new();
        (0..4).for_each(|n| batch.push(va(n)));
        batch.push(va(2));
        batch.push(va(0));
        assert_eq!(batch.queued(), 4);
        assert!(matches!(batch.drain().plan, InvalidationPlan::List(p) if p.as_slice() == [va(0), va(1), va(2), va(3)]));
    }

    #[test]
    fn code_fence_survives_without_pages() {
        let mut batch = InvalidationBatch::<4>::new();
        batch.mark_code_dirty();
        assert!(!batch.is_empty());
        let drained = batch.drain();
        assert!(matches!(drained.plan, InvalidationPlan::None));
        assert!(drained.fence_instructions);
        assert!(!drained.is_noop());
        assert!(batch.drain().is_noop());
    }
}
