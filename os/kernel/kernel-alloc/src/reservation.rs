/// A pre-charged number of physical pages.
///
/// Obtained from [`PhysicalPageAllocator::reserve`](crate::frame_alloc::PhysicalPageAllocator::reserve)
/// before entering a code path that must not fail for lack of memory, such as
/// a page-table walk that may need fresh table nodes. Each
/// [`allocate_page`](crate::frame_alloc::PhysicalPageAllocator::allocate_page)
/// draws one page from it; what is left must be handed back with
/// [`unreserve`](crate::frame_alloc::PhysicalPageAllocator::unreserve).
#[derive(Debug, PartialEq, Eq)]
#[must_use = "unused reservations must be returned with `unreserve`"]
pub struct PageReservation {
    count: usize,
}

impl PageReservation {
    /// A reservation holding no pages.
    pub const fn empty() -> Self {
        Self { count: 0 }
    }

    pub(crate) const fn new(count: usize) -> Self {
        Self { count }
    }

    /// Pages still available in this reservation.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Draw one page. Returns `false` if the reservation is exhausted.
    #[inline]
    pub(crate) const fn take_one(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }

    /// Undo a [`take_one`](Self::take_one) whose page was not handed out.
    #[inline]
    pub(crate) const fn put_back(&mut self) {
        self.count += 1;
    }

    /// Give up the remaining count, leaving the reservation empty.
    #[inline]
    pub(crate) const fn drain(&mut self) -> usize {
        let n = self.count;
        self.count = 0;
        n
    }
}
