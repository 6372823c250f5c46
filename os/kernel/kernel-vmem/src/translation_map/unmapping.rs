//! Unmapping paths that keep the VM layer's page bookkeeping in step.

use super::{MapLocker, TranslationMap};
use crate::error::TmapError;
use crate::platform::{CpuPinner, Platform};
use crate::pte::{Pte, PteFlags};
use crate::vm::{AreaWiring, CacheKind, MappingRecord, PageStore, VmArea, unmapped_page_state};
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use kernel_memory_addresses::{PhysicalPageNumber, VirtualAddress};
use log::{trace, warn};

/// Usage bits reported by
/// [`clear_accessed_and_modified`](TranslationMap::clear_accessed_and_modified).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PageUsage {
    /// `A` was set before the call.
    pub accessed: bool,
    /// `D` was set before the call.
    pub modified: bool,
}

impl PageUsage {
    const fn of(pte: Pte) -> Self {
        Self {
            accessed: pte.accessed(),
            modified: pte.dirty(),
        }
    }
}

impl<'p, P: Platform, const N: usize> TranslationMap<'p, P, N> {
    /// Remove the translation of the page at `va`, which belongs to `area`,
    /// and update the page's bookkeeping.
    ///
    /// The page's mapping record is removed (or its wired count dropped) and
    /// its `A`/`D` bits are transferred. With `update_page_queue`, a page
    /// that lost its last mapping is moved to the matching queue.
    ///
    /// # Errors
    /// - [`TmapError::Unaligned`] if `va` is not page aligned.
    /// - [`TmapError::NotMapped`] if there was no translation; nothing is
    ///   changed then.
    pub fn unmap_page<A, S>(&self, area: &A, va: VirtualAddress, store: &S, update_page_queue: bool) -> Result<(), TmapError>
    where
        A: VmArea + ?Sized,
        S: PageStore + ?Sized,
    {
        if !va.is_page_aligned() {
            return Err(TmapError::Unaligned { va });
        }

        let locker = self.lock();
        let old = {
            let _pinner = CpuPinner::new(self.platform);
            let Some(slot) = self.walker().lookup(va) else {
                return Err(TmapError::NotMapped { va });
            };
            let old = slot.take();
            if !old.valid() {
                return Err(TmapError::NotMapped { va });
            }
            old
        };
        trace!("unmap_page {va} (area {}) was {old:?}", area.id());

        self.mapped_pages.fetch_sub(1, Ordering::Relaxed);
        if old.accessed() {
            self.invalidate_page(va);
        }
        page_unmapped(locker, area, old.ppn(), PageUsage::of(old), update_page_queue, store);
        Ok(())
    }

    /// Remove every translation in `[base, base + size)` of `area`,
    /// updating the bookkeeping of each page as
    /// [`unmap_page`](Self::unmap_page) does.
    ///
    /// Mapping records are released only after the map lock is dropped.
    pub fn unmap_pages<A, S>(&self, area: &A, base: VirtualAddress, size: u64, store: &S, update_page_queue: bool)
    where
        A: VmArea + ?Sized,
        S: PageStore + ?Sized,
    {
        let end = base.checked_add(size).unwrap_or(VirtualAddress::new(u64::MAX));
        trace!("unmap_pages {base}..{end} (area {})", area.id());
        let device = area.cache_kind() == CacheKind::Device;
        let mut records = Vec::new();

        let locker = self.lock();
        {
            let _pinner = CpuPinner::new(self.platform);
            self.walker().for_each_slot(base, end, |va, slot| {
                let old = slot.take();
                if !old.valid() {
                    return;
                }
                self.mapped_pages.fetch_sub(1, Ordering::Relaxed);
                if old.accessed() {
                    self.invalidate_page(va);
                }
                if device {
                    return;
                }

                let page = old.ppn();
                transfer_usage(store, page, PageUsage::of(old));
                match area.wiring() {
                    AreaWiring::Unlocked => records.extend(detach(area, page, store)),
                    AreaWiring::Wired => store.decrement_wired_count(page),
                }
                if update_page_queue && !store.is_mapped(page) {
                    store.set_page_state(page, unmapped_page_state(store, page));
                }
            });
        }
        drop(locker);

        for record in records {
            store.free_mapping(record);
        }
    }

    /// Remove every translation of `area`, enumerating the area's mapping
    /// records instead of walking its address range.
    ///
    /// With both `deleting_address_space` and `ignore_top_cache_page_flags`,
    /// entries of pages in the area's own cache are left in place and their
    /// `A`/`D` bits are not transferred; the caller is about to destroy both
    /// the tree and that cache. Pages from lower caches are always unmapped.
    /// Device and wired areas fall back to
    /// [`unmap_pages`](Self::unmap_pages).
    ///
    /// # Panics
    /// If a mapping record has no valid translation.
    pub fn unmap_area<A, S>(&self, area: &A, deleting_address_space: bool, ignore_top_cache_page_flags: bool, store: &S)
    where
        A: VmArea + ?Sized,
        S: PageStore + ?Sized,
    {
        if area.cache_kind() == CacheKind::Device || area.wiring() == AreaWiring::Wired {
            self.unmap_pages(area, area.base(), area.size(), store, true);
            return;
        }

        let unmap_entries = !deleting_address_space || !ignore_top_cache_page_flags;
        trace!(
            "unmap_area {} {}..{} (deleting: {deleting_address_space}, unmap entries: {unmap_entries})",
            area.id(),
            area.base(),
            area.end()
        );

        let locker = self.lock();
        let records = store.take_area_mappings(area.id());
        {
            let _pinner = CpuPinner::new(self.platform);
            let walker = self.walker();
            for record in &records {
                store.remove_from_page(record);
                let fully_unmapped = !store.is_mapped(record.page);

                if unmap_entries || !record.in_area_cache {
                    let va = area.address_of(record.cache_offset);
                    let Some(slot) = walker.lookup(va) else {
                        panic!("area {} has a mapping at {va} without a page table", area.id());
                    };
                    let old = slot.take();
                    assert!(old.valid(), "area {} has a mapping at {va} without a translation", area.id());

                    if old.accessed() {
                        store.mark_accessed(record.page);
                        if !deleting_address_space {
                            self.invalidate_page(va);
                        }
                    }
                    if old.dirty() {
                        store.mark_modified(record.page);
                    }
                    if fully_unmapped {
                        store.set_page_state(record.page, unmapped_page_state(store, record.page));
                    }
                }

                self.mapped_pages.fetch_sub(1, Ordering::Relaxed);
            }
        }
        drop(locker);

        for record in records {
            store.free_mapping(record);
        }
    }

    /// Clear `A` and `D` of the translation of `va` and report what was set.
    ///
    /// With `unmap_if_unaccessed`, an entry whose `A` is clear is removed
    /// instead and the page is treated as unmapped while unaccessed: its
    /// mapping record goes away but its usage bits and queue stay
    /// untouched. Missing translations report no usage.
    pub fn clear_accessed_and_modified<A, S>(
        &self,
        area: &A,
        va: VirtualAddress,
        unmap_if_unaccessed: bool,
        store: &S,
    ) -> PageUsage
    where
        A: VmArea + ?Sized,
        S: PageStore + ?Sized,
    {
        if unmap_if_unaccessed {
            return self.clear_or_unmap(area, va, store);
        }

        let old = {
            let _pinner = CpuPinner::new(self.platform);
            let Some(slot) = self.walker().lookup(va) else {
                return PageUsage::default();
            };
            if !slot.load().valid() {
                return PageUsage::default();
            }
            slot.fetch_clear(PteFlags::USAGE)
        };

        if old.accessed() {
            self.invalidate_page(va);
            self.flush_unless_locked();
        }
        PageUsage::of(old)
    }

    fn clear_or_unmap<A, S>(&self, area: &A, va: VirtualAddress, store: &S) -> PageUsage
    where
        A: VmArea + ?Sized,
        S: PageStore + ?Sized,
    {
        let locker = self.lock();
        let old = {
            let _pinner = CpuPinner::new(self.platform);
            let Some(slot) = self.walker().lookup(va) else {
                return PageUsage::default();
            };

            let mut current = slot.load();
            loop {
                if !current.valid() {
                    return PageUsage::default();
                }
                let next = if current.accessed() {
                    current.with_accessed(false).with_dirty(false)
                } else {
                    Pte::ZERO
                };
                match slot.compare_exchange(current, next) {
                    Ok(_) => break current,
                    Err(actual) => current = actual,
                }
            }
        };

        let usage = PageUsage::of(old);
        if usage.accessed {
            self.invalidate_page(va);
            return usage;
        }

        trace!("unmapped unaccessed page {va} (area {})", area.id());
        self.mapped_pages.fetch_sub(1, Ordering::Relaxed);
        unaccessed_page_unmapped(locker, area, old.ppn(), store);
        usage
    }
}

/// Bookkeeping after one translation of `page` in `area` was removed.
///
/// Record removal happens under the map lock; the queue update and the
/// release of the record happen after `locker` is dropped.
fn page_unmapped<P, A, S, const N: usize>(
    locker: MapLocker<'_, '_, P, N>,
    area: &A,
    page: PhysicalPageNumber,
    usage: PageUsage,
    update_page_queue: bool,
    store: &S,
) where
    P: Platform,
    A: VmArea + ?Sized,
    S: PageStore + ?Sized,
{
    if area.cache_kind() == CacheKind::Device {
        drop(locker);
        return;
    }

    transfer_usage(store, page, usage);
    let record = match area.wiring() {
        AreaWiring::Unlocked => detach(area, page, store),
        AreaWiring::Wired => {
            store.decrement_wired_count(page);
            None
        }
    };
    drop(locker);

    if update_page_queue && !store.is_mapped(page) {
        store.set_page_state(page, unmapped_page_state(store, page));
    }
    if let Some(record) = record {
        store.free_mapping(record);
    }
}

/// Like [`page_unmapped`] for a page that was not used since its bits were
/// last cleared: nothing to transfer and no queue change.
fn unaccessed_page_unmapped<P, A, S, const N: usize>(
    locker: MapLocker<'_, '_, P, N>,
    area: &A,
    page: PhysicalPageNumber,
    store: &S,
) where
    P: Platform,
    A: VmArea + ?Sized,
    S: PageStore + ?Sized,
{
    if area.cache_kind() == CacheKind::Device {
        drop(locker);
        return;
    }

    let record = match area.wiring() {
        AreaWiring::Unlocked => detach(area, page, store),
        AreaWiring::Wired => {
            store.decrement_wired_count(page);
            None
        }
    };
    drop(locker);

    if let Some(record) = record {
        store.free_mapping(record);
    }
}

fn transfer_usage<S: PageStore + ?Sized>(store: &S, page: PhysicalPageNumber, usage: PageUsage) {
    if usage.accessed {
        store.mark_accessed(page);
    }
    if usage.modified {
        store.mark_modified(page);
    }
}

fn detach<A, S>(area: &A, page: PhysicalPageNumber, store: &S) -> Option<MappingRecord>
where
    A: VmArea + ?Sized,
    S: PageStore + ?Sized,
{
    let record = store.remove_mapping(page, area.id());
    if record.is_none() {
        warn!("page {page:?} mapped in area {} has no mapping record", area.id());
    }
    record
}
