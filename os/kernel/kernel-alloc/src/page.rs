//! Physical page states and allocation flags.

use bitflags::bitflags;

/// Queue/state a physical page is in, as tracked by the page allocator.
///
/// Translation maps only ever request [`Wired`](Self::Wired) pages for their
/// own table nodes and return them as [`Free`](Self::Free); the other states
/// are set on pages of mapped memory when their last mapping disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageState {
    /// Mapped and recently used.
    Active,
    /// Mapped or unmapped, not recently used; candidate for reclaim.
    Inactive,
    /// Contents differ from backing store; must be written back first.
    Modified,
    /// Clean, unmapped, still holding cache contents.
    Cached,
    /// Available for allocation.
    #[default]
    Free,
    /// Available for allocation and known to be zero-filled.
    Clear,
    /// Pinned; never reclaimed.
    Wired,
    /// Allocated but not yet placed in any queue.
    Unused,
}

impl PageState {
    /// Returns `true` for states the allocator may hand out again.
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::Clear)
    }
}

bitflags! {
    /// Options for [`PhysicalPageAllocator::allocate_page`](crate::frame_alloc::PhysicalPageAllocator::allocate_page).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageAllocFlags: u32 {
        /// Zero-fill the page before returning it.
        const CLEAR = 1 << 0;
    }
}
