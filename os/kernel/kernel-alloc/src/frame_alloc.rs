//! Physical page allocation with reservations.
//!
//! Callers that must not fail halfway through (a page-table walk allocating
//! intermediate tables, for example) first [`reserve`](PhysicalPageAllocator::reserve)
//! the worst-case number of pages, then draw from the [`PageReservation`]
//! with [`allocate_page`](PhysicalPageAllocator::allocate_page). Allocation
//! from a non-empty reservation never fails.

extern crate alloc;

use crate::phys_mapper::PhysMapper;
use crate::{PageAllocFlags, PageReservation, PageState};
use alloc::vec;
use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPageNumber};
use kernel_sync::SpinLock;
use log::{trace, warn};

/// Errors returned by [`PhysicalPageAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Not enough unreserved free pages.
    #[error("out of memory: requested {requested} pages, {available} available")]
    NoMemory { requested: usize, available: usize },
}

/// A source of 4 KiB physical pages.
pub trait PhysicalPageAllocator {
    /// Set aside `count` free pages for later allocation.
    ///
    /// # Errors
    /// [`AllocError::NoMemory`] if fewer than `count` unreserved pages are free.
    fn reserve(&self, count: usize) -> Result<PageReservation, AllocError>;

    /// Take one page out of `reservation` and put it into `state`.
    ///
    /// Returns `None` if the reservation is exhausted, or if
    /// [`PageAllocFlags::CLEAR`] was requested and the page could not be
    /// zero-filled. In the latter case the page stays free and the
    /// reservation keeps its count.
    fn allocate_page(
        &self,
        reservation: &mut PageReservation,
        state: PageState,
        flags: PageAllocFlags,
    ) -> Option<PhysicalPageNumber>;

    /// Return a page to the allocator. `state` must be a free state.
    fn free_page(&self, page: PhysicalPageNumber, state: PageState);

    /// Move an allocated page to another queue.
    fn set_page_state(&self, page: PhysicalPageNumber, state: PageState);

    /// Current state of `page`, or `None` if the allocator does not manage it.
    fn page_state(&self, page: PhysicalPageNumber) -> Option<PageState>;

    /// Hand back whatever is left of `reservation`.
    fn unreserve(&self, reservation: PageReservation);
}

impl<A: PhysicalPageAllocator + ?Sized> PhysicalPageAllocator for &A {
    fn reserve(&self, count: usize) -> Result<PageReservation, AllocError> {
        (**self).reserve(count)
    }

    fn allocate_page(
        &self,
        reservation: &mut PageReservation,
        state: PageState,
        flags: PageAllocFlags,
    ) -> Option<PhysicalPageNumber> {
        (**self).allocate_page(reservation, state, flags)
    }

    fn free_page(&self, page: PhysicalPageNumber, state: PageState) {
        (**self).free_page(page, state);
    }

    fn set_page_state(&self, page: PhysicalPageNumber, state: PageState) {
        (**self).set_page_state(page, state);
    }

    fn page_state(&self, page: PhysicalPageNumber) -> Option<PageState> {
        (**self).page_state(page)
    }

    fn unreserve(&self, reservation: PageReservation) {
        (**self).unreserve(reservation);
    }
}

/// Bitmap-based allocator over one contiguous range of physical pages.
///
/// One bit per page tracks free/used; a parallel array holds each page's
/// [`PageState`]. Pages are zero-filled through the supplied [`PhysMapper`]
/// when [`PageAllocFlags::CLEAR`] is requested.
pub struct BitmapPageAllocator<M> {
    mapper: M,
    first: PhysicalPageNumber,
    page_count: usize,
    inner: SpinLock<Inner>,
}

struct Inner {
    /// Bit set = page in use.
    used: Vec<u64>,
    states: Vec<PageState>,
    free: usize,
    reserved: usize,
    /// Word index to start the next search from.
    hint: usize,
}

impl<M: PhysMapper> BitmapPageAllocator<M> {
    /// Manage `page_count` pages starting at `start`.
    ///
    /// ### Debug assertions
    /// - Asserts `start` is page aligned.
    pub fn new(mapper: M, start: PhysicalAddress, page_count: usize) -> Self {
        debug_assert!(start.is_page_aligned());
        let words = page_count.div_ceil(64);
        let mut used = vec![0u64; words];
        // Bits past the end are permanently "used".
        if page_count % 64 != 0 {
            used[words - 1] = !0u64 << (page_count % 64);
        }
        Self {
            mapper,
            first: start.ppn(),
            page_count,
            inner: SpinLock::new(Inner {
                used,
                states: vec![PageState::Free; page_count],
                free: page_count,
                reserved: 0,
                hint: 0,
            }),
        }
    }

    /// The mapper used to clear pages.
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Number of pages managed.
    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    /// Free pages, reserved or not.
    pub fn free_count(&self) -> usize {
        self.inner.with_lock(|inner| inner.free)
    }

    /// Pages promised to outstanding reservations.
    pub fn reserved_count(&self) -> usize {
        self.inner.with_lock(|inner| inner.reserved)
    }

    /// Pages currently handed out.
    pub fn allocated_count(&self) -> usize {
        self.inner.with_lock(|inner| inner.states.len() - inner.free)
    }

    fn index_of(&self, page: PhysicalPageNumber) -> Option<usize> {
        let offset = page.as_u64().checked_sub(self.first.as_u64())?;
        let index = usize::try_from(offset).ok()?;
        (index < self.page_count).then_some(index)
    }

    fn page_at(&self, index: usize) -> PhysicalPageNumber {
        PhysicalPageNumber::new(self.first.as_u64() + index as u64)
    }
}

impl Inner {
    #[inline]
    fn is_used(&self, index: usize) -> bool {
        self.used[index / 64] & (1 << (index % 64)) != 0
    }

    #[inline]
    fn set_used(&mut self, index: usize, used: bool) {
        let bit = 1u64 << (index % 64);
        if used {
            self.used[index / 64] |= bit;
        } else {
            self.used[index / 64] &= !bit;
        }
    }

    fn find_free(&mut self) -> Option<usize> {
        let words = self.used.len();
        for step in 0..words {
            let word = (self.hint + step) % words;
            let bits = self.used[word];
            if bits != u64::MAX {
                self.hint = word;
                return Some(word * 64 + bits.trailing_ones() as usize);
            }
        }
        None
    }
}

impl<M: PhysMapper> PhysicalPageAllocator for BitmapPageAllocator<M> {
    fn reserve(&self, count: usize) -> Result<PageReservation, AllocError> {
        let mut inner = self.inner.lock();
        let available = inner.free - inner.reserved;
        if count > available {
            warn!("page reservation of {count} failed, {available} available");
            return Err(AllocError::NoMemory {
                requested: count,
                available,
            });
        }
        inner.reserved += count;
        Ok(PageReservation::new(count))
    }

    fn allocate_page(
        &self,
        reservation: &mut PageReservation,
        state: PageState,
        flags: PageAllocFlags,
    ) -> Option<PhysicalPageNumber> {
        if !reservation.take_one() {
            return None;
        }
        let index = {
            let mut inner = self.inner.lock();
            // A reservation guarantees a free page exists.
            let index = inner.find_free()?;
            inner.set_used(index, true);
            inner.states[index] = state;
            inner.free -= 1;
            inner.reserved -= 1;
            index
        };

        let page = self.page_at(index);
        if flags.contains(PageAllocFlags::CLEAR) {
            #[allow(clippy::cast_possible_truncation)]
            let len = PAGE_SIZE as usize;
            if let Err(e) = self.mapper.memset_physical(page.base(), 0, len) {
                warn!("cannot clear page {page}: {e}");
                self.inner.with_lock(|inner| {
                    inner.set_used(index, false);
                    inner.states[index] = PageState::Free;
                    inner.free += 1;
                    inner.reserved += 1;
                });
                reservation.put_back();
                return None;
            }
        }
        trace!("allocated page {page} as {state:?}");
        Some(page)
    }

    fn free_page(&self, page: PhysicalPageNumber, state: PageState) {
        debug_assert!(state.is_free(), "freeing page {page} into {state:?}");
        let Some(index) = self.index_of(page) else {
            warn!("free of unmanaged page {page}");
            return;
        };
        let mut inner = self.inner.lock();
        if !inner.is_used(index) {
            warn!("double free of page {page}");
            return;
        }
        inner.set_used(index, false);
        inner.states[index] = state;
        inner.free += 1;
        trace!("freed page {page}");
    }

    fn set_page_state(&self, page: PhysicalPageNumber, state: PageState) {
        if let Some(index) = self.index_of(page) {
            self.inner.with_lock(|inner| inner.states[index] = state);
        }
    }

    fn page_state(&self, page: PhysicalPageNumber) -> Option<PageState> {
        let index = self.index_of(page)?;
        Some(self.inner.with_lock(|inner| inner.states[index]))
    }

    fn unreserve(&self, mut reservation: PageReservation) {
        let count = reservation.drain();
        if count > 0 {
            self.inner.with_lock(|inner| inner.reserved -= count);
        }
    }
}
