//! # Translation maps
//!
//! A [`TranslationMap`] owns the page-table tree of one address space (the
//! kernel's or a user team's) and is the only thing that modifies it.
//!
//! ## Locking
//!
//! Structural changes (creating table nodes, installing or removing leaf
//! entries) are serialized by a recursive lock. Every such operation takes
//! it internally, so it is correct standalone; callers that want several
//! operations to share one TLB flush hold a [`MapLocker`] across them. The
//! flush happens when the outermost locker is released.
//!
//! Permission and usage-bit updates of existing entries
//! ([`protect`](TranslationMap::protect), [`clear_flags`](TranslationMap::clear_flags),
//! [`clear_accessed_and_modified`](TranslationMap::clear_accessed_and_modified)
//! without unmapping) do not take the lock. They update the entry with an
//! atomic read-modify-write and flush right away unless the calling thread
//! holds the lock, in which case its locker flushes later.
//!
//! [`query`](TranslationMap::query) and the operations of
//! [`NonBlockingTranslationMap`] never block and are usable from interrupt
//! handlers.
//!
//! ## Invalidation
//!
//! A translation can only be cached if the MMU used it, which it signals by
//! setting `A`. Removing or downgrading an entry therefore queues its page
//! for invalidation only if `A` was set. Installing an entry over an
//! invalid slot never needs a fence.
//!
//! ### Example
//! ```rust,ignore
//! let mut reservation = allocator.reserve(map.max_pages_needed_to_map(va, va + PAGE_SIZE))?;
//! map.map(va, pa, Protection::READ | Protection::WRITE, MemoryType::default(), &mut reservation)?;
//! allocator.unreserve(reservation);
//!
//! let q = map.query(va);
//! assert_eq!(q.physical_address, pa);
//! ```

mod locker;
mod non_blocking;
mod unmapping;

pub use locker::MapLocker;
pub use non_blocking::{InterruptContext, NonBlockingTranslationMap};
pub use unmapping::PageUsage;

use crate::atomic_pte::AtomicPte;
use crate::cpu_set::{AtomicCpuSet, CpuId, CpuSet};
use crate::error::{MapError, TmapError};
use crate::flags::{MemoryType, PageFlags, Protection};
use crate::invalidation::{InvalidationBatch, InvalidationPlan, Shootdown};
use crate::page_table::{Level, TableIndex};
use crate::platform::{CpuPinner, Platform};
use crate::pte::{Pte, PteFlags};
use crate::walker::{KernelRootSlice, PageTree, Walker};
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_alloc::PageReservation;
use kernel_info::memory::KERNEL_ROOT_INDICES;
use kernel_info::tuning::TLB_INVALIDATE_CAPACITY;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_registers::satp::Satp;
use kernel_sync::{IrqGuard, RecursiveLock, SpinLock};
use log::{debug, trace};

/// Result of [`TranslationMap::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResult {
    /// Base of the mapped physical page; zero if not mapped.
    pub physical_address: PhysicalAddress,
    pub flags: PageFlags,
}

impl QueryResult {
    pub const NOT_MAPPED: Self = Self {
        physical_address: PhysicalAddress::zero(),
        flags: PageFlags::empty(),
    };

    #[inline]
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.flags.contains(PageFlags::PRESENT)
    }

    fn from_pte(pte: Pte) -> Self {
        if pte.is_leaf() {
            Self {
                physical_address: pte.physical_address(),
                flags: PageFlags::from_leaf(pte.flags()),
            }
        } else {
            Self::NOT_MAPPED
        }
    }
}

/// The page tables of one address space.
///
/// `N` is the number of pages remembered for a targeted flush before
/// falling back to invalidating everything.
pub struct TranslationMap<'p, P: Platform, const N: usize = TLB_INVALIDATE_CAPACITY> {
    platform: &'p P,
    tree: PageTree,
    lock: RecursiveLock,
    batch: SpinLock<InvalidationBatch<N>>,
    mapped_pages: AtomicUsize,
    active_on: AtomicCpuSet,
    /// Lost compare-and-swap rounds in [`protect`](Self::protect).
    cas_retries: AtomicU64,
}

impl<'p, P: Platform> TranslationMap<'p, P> {
    /// The kernel address space. `root` adopts a tree built during early
    /// boot; `None` creates the root on first use.
    ///
    /// An adopted tree was not allocated by this map and is never freed by it.
    #[must_use]
    pub const fn new_kernel(platform: &'p P, root: Option<PhysicalAddress>) -> Self {
        Self::kernel_with_capacity(platform, root)
    }

    /// A user address space sharing the kernel half captured in `kernel`.
    ///
    /// See [`shared_root_slice`](Self::shared_root_slice).
    #[must_use]
    pub const fn new_user(platform: &'p P, kernel: KernelRootSlice) -> Self {
        Self::user_with_capacity(platform, kernel)
    }
}

impl<'p, P: Platform, const N: usize> TranslationMap<'p, P, N> {
    /// [`new_kernel`](TranslationMap::new_kernel) remembering up to `N`
    /// pages per flush.
    #[must_use]
    pub const fn kernel_with_capacity(platform: &'p P, root: Option<PhysicalAddress>) -> Self {
        Self::with_tree(platform, PageTree::kernel(root))
    }

    /// [`new_user`](TranslationMap::new_user) remembering up to `N` pages
    /// per flush.
    #[must_use]
    pub const fn user_with_capacity(platform: &'p P, kernel: KernelRootSlice) -> Self {
        Self::with_tree(platform, PageTree::user(kernel))
    }

    const fn with_tree(platform: &'p P, tree: PageTree) -> Self {
        Self {
            platform,
            tree,
            lock: RecursiveLock::new(),
            batch: SpinLock::new(InvalidationBatch::new()),
            mapped_pages: AtomicUsize::new(0),
            active_on: AtomicCpuSet::new(),
            cas_retries: AtomicU64::new(0),
        }
    }

    #[inline]
    fn walker(&self) -> Walker<'_, P::Mapper> {
        self.tree.walker(self.platform.phys_mapper())
    }

    #[inline]
    #[must_use]
    pub const fn is_kernel(&self) -> bool {
        self.tree.is_kernel()
    }

    /// Physical address of the root table, if it exists yet.
    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<PhysicalAddress> {
        self.tree.root()
    }

    /// The `satp` value that activates this map, once it has a root.
    #[must_use]
    pub fn satp(&self) -> Option<Satp> {
        self.root().map(|root| Satp::for_root(root, 0))
    }

    #[inline]
    #[must_use]
    pub fn mapped_page_count(&self) -> usize {
        self.mapped_pages.load(Ordering::Relaxed)
    }

    /// Bytes covered by valid leaf entries.
    #[inline]
    #[must_use]
    pub fn mapped_size(&self) -> u64 {
        self.mapped_page_count() as u64 * PAGE_SIZE
    }

    /// Table nodes allocated by this map and not yet freed.
    #[inline]
    #[must_use]
    pub fn table_page_count(&self) -> usize {
        self.tree.table_pages()
    }

    /// How often a concurrent update forced [`protect`](Self::protect) to
    /// retry.
    #[inline]
    #[must_use]
    pub fn cas_retries(&self) -> u64 {
        self.cas_retries.load(Ordering::Relaxed)
    }

    /// Pages queued for invalidation and not yet flushed.
    #[must_use]
    pub fn pending_invalidations(&self) -> usize {
        self.batch.lock_irq(self.platform).queued()
    }

    /// Acquire the map lock. Releasing the outermost locker flushes.
    #[inline]
    pub fn lock(&self) -> MapLocker<'_, 'p, P, N> {
        MapLocker::new(self)
    }

    /// Record that `cpu` switched to this map.
    pub fn activate_on(&self, cpu: CpuId) {
        self.active_on.insert(cpu);
    }

    /// Record that `cpu` switched away from this map.
    pub fn deactivate_on(&self, cpu: CpuId) {
        self.active_on.remove(cpu);
    }

    /// CPUs currently running with this map.
    #[must_use]
    pub fn active_cpus(&self) -> CpuSet {
        self.active_on.load()
    }

    /// Copies of the root pointer entries for the kernel half, for
    /// [`new_user`](Self::new_user).
    ///
    /// Only slots that already hold a table are captured; see
    /// [`preallocate_kernel_tables`](Self::preallocate_kernel_tables).
    #[must_use]
    pub fn shared_root_slice(&self) -> KernelRootSlice {
        self.walker()
            .root_node()
            .map_or_else(KernelRootSlice::empty, KernelRootSlice::capture)
    }

    /// Give every kernel-half root slot a level-1 table, so that user maps
    /// created afterwards see every later kernel mapping.
    ///
    /// Needs at most `1 + 256` pages from `reservation`.
    ///
    /// # Panics
    /// - If called on a user map.
    /// - If the reservation runs out.
    pub fn preallocate_kernel_tables(&self, reservation: &mut PageReservation) {
        assert!(self.is_kernel(), "only the kernel map shares its root slots");
        let _locker = self.lock();
        let walker = self.walker();
        let allocator = self.platform.page_allocator();
        for index in KERNEL_ROOT_INDICES {
            #[allow(clippy::cast_possible_truncation)]
            let index = TableIndex::new(index as u16);
            walker.ensure_root_slot(index, allocator, reservation);
        }
        debug!("kernel root slots preallocated, {} table pages", self.table_page_count());
    }

    /// Upper bound of table nodes a [`map`](Self::map) of every page in
    /// `[start, end)` may allocate.
    #[must_use]
    pub fn max_pages_needed_to_map(&self, start: VirtualAddress, end: VirtualAddress) -> usize {
        if end <= start {
            return 0;
        }
        let first = start.as_u64();
        let last = end.as_u64() - 1;
        let entries_touched = |level: Level| {
            let shift = level.entry_span().trailing_zeros();
            (last >> shift) - (first >> shift) + 1
        };
        let root = u64::from(self.root().is_none());
        usize::try_from(root + entries_touched(Level::Root) + entries_touched(Level::Middle)).unwrap_or(usize::MAX)
    }

    /// Map the page at `va` to `pa`.
    ///
    /// Missing tables are taken from `reservation`, which must hold at least
    /// [`max_pages_needed_to_map`](Self::max_pages_needed_to_map) pages.
    /// Replacing an existing translation is allowed; the old one is queued
    /// for invalidation if it was used. `memory_type` is accepted and
    /// ignored.
    ///
    /// # Errors
    /// - [`MapError::Unaligned`] if either address is not page aligned.
    /// - [`MapError::NoAccess`] if `protection` grants nothing.
    ///
    /// # Panics
    /// If the reservation runs out.
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        protection: Protection,
        memory_type: MemoryType,
        reservation: &mut PageReservation,
    ) -> Result<(), MapError> {
        if !va.is_page_aligned() || !pa.is_page_aligned() {
            return Err(MapError::Unaligned { va, pa });
        }
        let permissions = protection.leaf_flags();
        if !permissions.intersects(PteFlags::RWX) {
            return Err(MapError::NoAccess);
        }
        trace!("map {va} -> {pa} {protection:?} {memory_type:?}");

        let _locker = self.lock();
        let _pinner = CpuPinner::new(self.platform);

        let slot = self
            .walker()
            .lookup_or_allocate(va, self.platform.page_allocator(), reservation);
        let previous = slot.swap(Pte::leaf(pa.ppn(), permissions, self.is_kernel()));

        if previous.valid() {
            if previous.accessed() {
                self.invalidate_page(va);
            }
        } else {
            self.mapped_pages.fetch_add(1, Ordering::Relaxed);
        }

        if permissions.contains(PteFlags::EXEC) {
            self.batch.lock_irq(self.platform).mark_code_dirty();
        }
        Ok(())
    }

    /// Remove every translation in `[start, end)`. Pages without one are
    /// skipped.
    pub fn unmap(&self, start: VirtualAddress, end: VirtualAddress) {
        trace!("unmap {start}..{end}");
        let _locker = self.lock();
        let _pinner = CpuPinner::new(self.platform);

        self.walker().for_each_slot(start, end, |va, slot| {
            let old = slot.take();
            if !old.valid() {
                return;
            }
            self.mapped_pages.fetch_sub(1, Ordering::Relaxed);
            if old.accessed() {
                self.invalidate_page(va);
            }
        });
    }

    /// Change the permissions of every translation in `[base, top)`.
    ///
    /// Only the `R`/`W`/`X`/`U` bits change; the target page, validity and
    /// usage bits are preserved even under concurrent updates. Pages
    /// without a translation are skipped. `memory_type` is accepted and
    /// ignored.
    ///
    /// # Errors
    /// [`TmapError::NoAccess`] if `protection` grants nothing; use
    /// [`unmap`](Self::unmap) to revoke all access.
    pub fn protect(
        &self,
        base: VirtualAddress,
        top: VirtualAddress,
        protection: Protection,
        memory_type: MemoryType,
    ) -> Result<(), TmapError> {
        let permissions = protection.leaf_flags();
        if !permissions.intersects(PteFlags::RWX) {
            return Err(TmapError::NoAccess);
        }
        trace!("protect {base}..{top} {protection:?} {memory_type:?}");
        let executable = permissions.contains(PteFlags::EXEC);

        {
            let _pinner = CpuPinner::new(self.platform);
            self.walker()
                .for_each_slot(base, top, |va, slot| self.protect_slot(va, slot, permissions, executable));
        }

        self.flush_unless_locked();
        Ok(())
    }

    fn protect_slot(&self, va: VirtualAddress, slot: &AtomicPte, permissions: PteFlags, executable: bool) {
        let mut current = slot.load();
        loop {
            if !current.valid() {
                return;
            }
            match slot.compare_exchange(current, current.with_permissions(permissions)) {
                Ok(_) => break,
                Err(actual) => {
                    self.cas_retries.fetch_add(1, Ordering::Relaxed);
                    current = actual;
                }
            }
        }

        if current.accessed() {
            self.invalidate_page(va);
        }
        if executable {
            self.batch.lock_irq(self.platform).mark_code_dirty();
        }
    }

    /// Translation and state of the page containing `va`.
    ///
    /// Never locks and never allocates. Unmapped pages report
    /// [`QueryResult::NOT_MAPPED`].
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> QueryResult {
        let _pinner = CpuPinner::new(self.platform);
        self.query_unpinned(va)
    }

    fn query_unpinned(&self, va: VirtualAddress) -> QueryResult {
        self.walker()
            .lookup(va)
            .map_or(QueryResult::NOT_MAPPED, |slot| QueryResult::from_pte(slot.load()))
    }

    /// Physical address `va` translates to, including the page offset.
    ///
    /// # Errors
    /// - [`TmapError::NotMapped`] if there is no translation.
    /// - [`TmapError::Unsupported`] if a superpage covers `va`.
    pub fn translate(&self, va: VirtualAddress) -> Result<PhysicalAddress, TmapError> {
        let pte = self.walker().translate(va)?;
        Ok(pte.physical_address() + va.page_offset())
    }

    /// Clear [`PageFlags::ACCESSED`] and/or [`PageFlags::MODIFIED`] on the
    /// translation of `va`. Other flags are ignored.
    pub fn clear_flags(&self, va: VirtualAddress, flags: PageFlags) {
        {
            let _pinner = CpuPinner::new(self.platform);
            let Some(slot) = self.walker().lookup(va) else {
                return;
            };
            if !slot.load().valid() {
                return;
            }
            slot.fetch_clear(flags.usage_bits());
        }

        self.invalidate_page(va);
        self.flush_unless_locked();
    }

    /// Apply all queued invalidations on this CPU and send them to the
    /// other CPUs that may cache translations of this map.
    ///
    /// Remote completion is not awaited.
    pub fn flush(&self) {
        let drained = self.batch.lock_irq(self.platform).drain();
        if drained.is_noop() {
            return;
        }

        let pinner = CpuPinner::new(self.platform);
        let targets = self.remote_targets(pinner.cpu());
        trace!("flush {:?} (fence.i: {}) -> {targets:?}", drained.plan, drained.fence_instructions);

        {
            let _irq = IrqGuard::new(self.platform);
            match &drained.plan {
                InvalidationPlan::None => {}
                InvalidationPlan::List(pages) => self.platform.invalidate_local_pages(pages.as_slice()),
                InvalidationPlan::Global => self.platform.invalidate_local_all(self.is_kernel()),
            }
            if drained.fence_instructions {
                self.platform.fence_instructions_local();
            }
        }

        if targets.is_empty() {
            return;
        }
        match &drained.plan {
            InvalidationPlan::None => {}
            InvalidationPlan::List(pages) => {
                self.platform.send_shootdown(targets, &Shootdown::Pages(pages.as_slice()));
            }
            InvalidationPlan::Global => {
                let include_global = self.is_kernel();
                self.platform.send_shootdown(targets, &Shootdown::All { include_global });
            }
        }
        if drained.fence_instructions {
            self.platform.send_shootdown(targets, &Shootdown::FenceInstructions);
        }
    }

    /// Other CPUs that may hold translations of this map.
    fn remote_targets(&self, current: CpuId) -> CpuSet {
        let cpus = if self.is_kernel() {
            self.platform.all_cpus()
        } else {
            self.active_on.load()
        };
        cpus.without(current)
    }

    /// Flush now unless the calling thread holds the lock; then the
    /// outermost [`MapLocker`] does it.
    fn flush_unless_locked(&self) {
        if !self.lock.is_owned_by(self.platform.current_thread()) {
            self.flush();
        }
    }

    #[inline]
    fn invalidate_page(&self, va: VirtualAddress) {
        self.batch.lock_irq(self.platform).push(va);
    }

    /// Log every translation at `debug` level.
    ///
    /// # Panics
    /// If the tree contains a superpage, which this map never creates.
    pub fn debug_dump(&self) {
        debug!(
            "{} translation map, root {:?}, {} pages mapped, {} table pages",
            if self.is_kernel() { "kernel" } else { "user" },
            self.root(),
            self.mapped_page_count(),
            self.table_page_count()
        );
        self.walker().visit_leaves(|va, level, pte| {
            assert!(
                level == Level::Leaf,
                "superpage {pte:?} at level {} mapping {va}",
                level.number()
            );
            debug!("  {va} -> {pte:?}");
        });
    }

    /// Call `f` with every valid leaf entry this map owns, in address order.
    pub fn for_each_mapping(&self, f: impl FnMut(VirtualAddress, Pte)) {
        self.walker().for_each_leaf(f);
    }
}

impl<P: Platform, const N: usize> Drop for TranslationMap<'_, P, N> {
    /// Frees all table nodes the map owns.
    ///
    /// A kernel map must outlive every user map created from its
    /// [`shared_root_slice`](Self::shared_root_slice). A kernel map over an
    /// adopted boot tree frees nothing.
    ///
    /// # Panics
    /// If the map is live on the current CPU.
    fn drop(&mut self) {
        let Some(root) = self.root() else {
            return;
        };
        let live = self.platform.current_satp();
        assert!(
            !(live.is_sv39() && live.root() == root),
            "destroying the translation map live on CPU {}",
            self.platform.current_cpu()
        );
        debug_assert!(!self.lock.is_locked(), "destroying a locked translation map");

        self.flush();
        if self.tree.is_adopted() {
            debug!("translation map at {root} released, boot tables kept");
            return;
        }
        self.walker().free_tree(self.platform.page_allocator());
        debug!("translation map at {root} freed");
    }
}

impl<P: Platform, const N: usize> fmt::Debug for TranslationMap<'_, P, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationMap")
            .field("tree", &self.tree)
            .field("mapped_pages", &self.mapped_page_count())
            .field("active_on", &self.active_on)
            .finish_non_exhaustive()
    }
}
