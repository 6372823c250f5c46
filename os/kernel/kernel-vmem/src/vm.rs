//! The VM-layer view the unmapping paths need.
//!
//! A translation map only knows page-table entries. When it removes a
//! translation of a cache page, the VM layer's bookkeeping has to follow:
//! the hardware `A`/`D` bits move to the page, the mapping record between
//! page and area goes away (or the wired count drops), and a page that lost
//! its last mapping moves to the queue matching its state. [`VmArea`] and
//! [`PageStore`] are the narrow interfaces to that bookkeeping.

use alloc::vec::Vec;
use kernel_alloc::PageState;
use kernel_memory_addresses::{PhysicalPageNumber, VirtualAddress};

/// Identity of an area, used to match mapping records.
pub type AreaId = u64;

/// How an area's pages are held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaWiring {
    /// Pages come and go; each mapping has a [`MappingRecord`].
    Unlocked,
    /// Pages are pinned; mappings are tracked with a wired count.
    Wired,
}

/// The kind of cache backing an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Anonymous memory; pages are discarded rather than written back.
    Temporary,
    /// File- or swap-backed memory.
    Backed,
    /// Device memory without page bookkeeping.
    Device,
}

/// A contiguous range of an address space backed by one cache.
pub trait VmArea {
    fn id(&self) -> AreaId;
    fn base(&self) -> VirtualAddress;
    fn size(&self) -> u64;

    /// Byte offset into the cache at which the area starts.
    fn cache_offset(&self) -> u64;

    fn wiring(&self) -> AreaWiring;
    fn cache_kind(&self) -> CacheKind;

    /// Exclusive end of the area.
    fn end(&self) -> VirtualAddress {
        self.base() + self.size()
    }

    /// Virtual address at which the cache page at `cache_offset` is mapped.
    fn address_of(&self, cache_offset: u64) -> VirtualAddress {
        self.base() + (cache_offset - self.cache_offset())
    }
}

/// Link between one page and one area that maps it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingRecord {
    pub area: AreaId,
    pub page: PhysicalPageNumber,
    /// Byte offset of the page within its cache.
    pub cache_offset: u64,
    /// The page belongs to the area's own cache rather than to a cache
    /// further down the chain.
    pub in_area_cache: bool,
}

/// The VM layer's per-page database.
///
/// Implementations synchronize internally; the translation map calls these
/// with and without its own lock held, as noted per method in the
/// unmapping paths.
pub trait PageStore {
    fn mark_accessed(&self, page: PhysicalPageNumber);
    fn mark_modified(&self, page: PhysicalPageNumber);
    fn is_modified(&self, page: PhysicalPageNumber) -> bool;

    /// The page still has a mapping record or a non-zero wired count.
    fn is_mapped(&self, page: PhysicalPageNumber) -> bool;

    /// The page's cache is temporary.
    fn is_cache_temporary(&self, page: PhysicalPageNumber) -> bool;

    fn set_page_state(&self, page: PhysicalPageNumber, state: PageState);

    /// Detach the record linking `page` to `area` from both the page and the
    /// area. The record is returned for [`free_mapping`](Self::free_mapping).
    fn remove_mapping(&self, page: PhysicalPageNumber, area: AreaId) -> Option<MappingRecord>;

    fn decrement_wired_count(&self, page: PhysicalPageNumber);

    /// Detach every record from `area`, leaving them linked to their pages.
    fn take_area_mappings(&self, area: AreaId) -> Vec<MappingRecord>;

    /// Unlink a record obtained from [`take_area_mappings`](Self::take_area_mappings)
    /// from its page.
    fn remove_from_page(&self, record: &MappingRecord);

    /// Release the storage of a detached record.
    fn free_mapping(&self, record: MappingRecord);
}

/// The queue a page enters once its last mapping is gone.
pub(crate) fn unmapped_page_state<S: PageStore + ?Sized>(store: &S, page: PhysicalPageNumber) -> PageState {
    if store.is_cache_temporary(page) {
        PageState::Inactive
    } else if store.is_modified(page) {
        PageState::Modified
    } else {
        PageState::Cached
    }
}
