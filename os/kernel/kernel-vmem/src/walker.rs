//! # Page-table walking
//!
//! A [`PageTree`] is the root pointer of one address space plus the
//! bookkeeping needed to grow and free it. A [`Walker`] combines a tree with
//! a [`PhysMapper`] so that table nodes, which live in physical pages, can be
//! dereferenced:
//!
//! ```text
//!   root (level 2)        level 1              level 0
//!  ┌───────────────┐    ┌───────────────┐    ┌───────────────┐
//!  │ VPN[2] ───────┼───►│ VPN[1] ───────┼───►│ VPN[0] = leaf │──► 4 KiB page
//!  └───────────────┘    └───────────────┘    └───────────────┘
//! ```
//!
//! Lookups never allocate and never lock. They may run concurrently with an
//! allocating walk because nodes are zero-filled before their pointer entry
//! is published and are only freed when the whole tree goes away.
//! Allocating walks ([`Walker::lookup_or_allocate`]) must be serialized by
//! the caller.
//!
//! ## Kernel range sharing
//!
//! The root slots covering the kernel half ([`KERNEL_ROOT_INDICES`]) of every
//! user tree are copies of the kernel tree's pointer entries, taken when the
//! user root is created. Since only pointers are copied, later changes
//! further down the kernel tree are visible everywhere without propagation.
//! A user tree never frees nodes reached through such a shared slot.

use crate::atomic_pte::AtomicPte;
use crate::error::TmapError;
use crate::page_table::{ENTRIES_PER_TABLE, Level, PageTableNode, TableIndex};
use crate::pte::Pte;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_alloc::phys_mapper::PhysMapper;
use kernel_alloc::{PageAllocFlags, PageReservation, PageState, PhysicalPageAllocator};
use kernel_info::memory::KERNEL_ROOT_INDICES;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPageNumber, VirtualAddress};
use log::debug;

/// Number of root slots in the kernel half.
pub const KERNEL_ROOT_SLOTS: usize = KERNEL_ROOT_INDICES.end - KERNEL_ROOT_INDICES.start;

/// Bits 63..39 of an upper-half address.
const SIGN_EXTENSION: u64 = !((1 << 39) - 1);

/// Value copies of the kernel tree's root entries for the kernel half.
///
/// Only pointer entries are captured; anything else is stored as invalid.
#[derive(Clone)]
pub struct KernelRootSlice {
    entries: [Pte; KERNEL_ROOT_SLOTS],
}

impl KernelRootSlice {
    /// A slice sharing nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: [Pte::ZERO; KERNEL_ROOT_SLOTS],
        }
    }

    /// Capture the kernel half of `root`.
    #[must_use]
    pub fn capture(root: &PageTableNode) -> Self {
        let mut slice = Self::empty();
        for (offset, index) in KERNEL_ROOT_INDICES.enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let entry = root.entry(TableIndex::new(index as u16)).load();
            if entry.is_pointer() {
                slice.entries[offset] = entry;
            }
        }
        slice
    }

    /// The entry destined for root slot `index`, if `index` is in the kernel half.
    #[must_use]
    pub fn get(&self, index: TableIndex) -> Option<Pte> {
        let offset = index.as_usize().checked_sub(KERNEL_ROOT_INDICES.start)?;
        self.entries.get(offset).copied()
    }

    /// `(root slot, entry)` for every shared pointer.
    pub fn iter(&self) -> impl Iterator<Item = (TableIndex, Pte)> + '_ {
        KERNEL_ROOT_INDICES
            .zip(self.entries.iter())
            .filter(|(_, e)| e.valid())
            .map(|(i, e)| {
                #[allow(clippy::cast_possible_truncation)]
                let index = TableIndex::new(i as u16);
                (index, *e)
            })
    }

    /// Number of shared root slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.valid()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for KernelRootSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter().map(|(i, e)| (i.as_usize(), e))).finish()
    }
}

/// Root of one address space's table tree.
pub struct PageTree {
    /// Physical address of the root node; `0` until the first allocation.
    root: AtomicU64,
    /// Nodes allocated by this tree and not yet freed.
    table_pages: AtomicUsize,
    /// Pointer entries are marked global (kernel tree).
    global: bool,
    /// Kernel half for user trees.
    shared: Option<KernelRootSlice>,
    /// The root was built outside this tree and is never freed by it.
    adopted: bool,
}

impl PageTree {
    /// The kernel tree, optionally adopting a root built by early boot code.
    ///
    /// An adopted tree is not counted in [`table_pages`](Self::table_pages)
    /// and [`Walker::free_tree`] leaves it in place.
    #[must_use]
    pub const fn kernel(root: Option<PhysicalAddress>) -> Self {
        let (root, adopted) = match root {
            Some(pa) => (pa.as_u64(), true),
            None => (0, false),
        };
        Self {
            root: AtomicU64::new(root),
            table_pages: AtomicUsize::new(0),
            global: true,
            shared: None,
            adopted,
        }
    }

    /// A user tree whose root will receive `shared` when it is created.
    #[must_use]
    pub const fn user(shared: KernelRootSlice) -> Self {
        Self {
            root: AtomicU64::new(0),
            table_pages: AtomicUsize::new(0),
            global: false,
            shared: Some(shared),
            adopted: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<PhysicalAddress> {
        match self.root.load(Ordering::Acquire) {
            0 => None,
            pa => Some(PhysicalAddress::new(pa)),
        }
    }

    /// Nodes currently owned by this tree.
    #[inline]
    #[must_use]
    pub fn table_pages(&self) -> usize {
        self.table_pages.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub const fn is_kernel(&self) -> bool {
        self.global
    }

    /// The root was handed in by early boot code.
    #[inline]
    #[must_use]
    pub const fn is_adopted(&self) -> bool {
        self.adopted
    }

    #[inline]
    pub const fn walker<'a, M: PhysMapper + ?Sized>(&'a self, mapper: &'a M) -> Walker<'a, M> {
        Walker { tree: self, mapper }
    }

    /// Returns `true` if the subtree under root slot `index` belongs to this
    /// tree rather than to the kernel tree.
    fn owns_root_slot(&self, index: TableIndex, entry: Pte) -> bool {
        match self.shared.as_ref().and_then(|s| s.get(index)) {
            Some(shared) => shared != entry,
            None => true,
        }
    }
}

impl fmt::Debug for PageTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTree")
            .field("root", &self.root())
            .field("table_pages", &self.table_pages())
            .field("kernel", &self.global)
            .field("adopted", &self.adopted)
            .finish_non_exhaustive()
    }
}

/// Why a walk stopped above the last level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// The tree has no root yet.
    NoRoot,
    /// The entry at `level` is not a table pointer; it holds `entry`.
    Entry { level: Level, entry: Pte },
}

/// A [`PageTree`] made walkable through a [`PhysMapper`].
pub struct Walker<'a, M: ?Sized> {
    tree: &'a PageTree,
    mapper: &'a M,
}

impl<'a, M: PhysMapper + ?Sized> Walker<'a, M> {
    /// View the node at `pa`.
    ///
    /// # Panics
    /// If `pa` is outside the physical window, which means the tree is corrupt.
    fn node(&self, pa: PhysicalAddress) -> &'a PageTableNode {
        match self.mapper.phys_to_virt(pa, PAGE_SIZE) {
            // SAFETY: table nodes are page aligned, zero-initialized pages
            // owned by the tree; all access goes through atomics.
            Ok(va) => unsafe { &*(va.as_u64() as *const PageTableNode) },
            Err(e) => panic!("page table node at {pa} unreachable: {e}"),
        }
    }

    #[must_use]
    pub fn root_node(&self) -> Option<&'a PageTableNode> {
        self.tree.root().map(|pa| self.node(pa))
    }

    /// The last-level table covering `va`.
    ///
    /// # Errors
    /// Where the walk stopped if some level has no table pointer.
    pub fn leaf_table(&self, va: VirtualAddress) -> Result<&'a PageTableNode, Miss> {
        let mut node = self.root_node().ok_or(Miss::NoRoot)?;
        let mut level = Level::Root;
        while let Some(next) = level.below() {
            let entry = node.entry_for(va, level).load();
            if !entry.is_pointer() {
                return Err(Miss::Entry { level, entry });
            }
            node = self.node(entry.physical_address());
            level = next;
        }
        Ok(node)
    }

    /// The leaf slot for `va`, if every table above it exists.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<&'a AtomicPte> {
        self.leaf_table(va).ok().map(|table| table.entry_for(va, Level::Leaf))
    }

    /// The valid leaf entry translating `va`.
    ///
    /// # Errors
    /// - [`TmapError::NotMapped`] if there is none.
    /// - [`TmapError::Unsupported`] if the walk hits a superpage.
    pub fn translate(&self, va: VirtualAddress) -> Result<Pte, TmapError> {
        match self.leaf_table(va) {
            Ok(table) => {
                let pte = table.entry_for(va, Level::Leaf).load();
                if pte.is_leaf() {
                    Ok(pte)
                } else {
                    Err(TmapError::NotMapped { va })
                }
            }
            Err(Miss::Entry { level, entry }) if entry.is_leaf() => Err(TmapError::Unsupported {
                va,
                level: level.number(),
            }),
            Err(_) => Err(TmapError::NotMapped { va }),
        }
    }

    /// The leaf slot for `va`, creating missing tables from `reservation`.
    ///
    /// The caller must hold the owning map's lock.
    ///
    /// # Panics
    /// - If the reservation runs out.
    /// - If the walk hits a superpage.
    pub fn lookup_or_allocate<A: PhysicalPageAllocator + ?Sized>(
        &self,
        va: VirtualAddress,
        allocator: &A,
        reservation: &mut PageReservation,
    ) -> &'a AtomicPte {
        let mut node = self.root_or_allocate(allocator, reservation);
        let mut level = Level::Root;
        while let Some(next) = level.below() {
            let slot = node.entry_for(va, level);
            let mut entry = slot.load();
            if !entry.valid() {
                let page = self.allocate_node(allocator, reservation);
                entry = Pte::pointer(page, self.tree.global);
                slot.store(entry);
            }
            assert!(
                entry.is_pointer(),
                "superpage at level {} covering {va}",
                level.number()
            );
            node = self.node(entry.physical_address());
            level = next;
        }
        node.entry_for(va, Level::Leaf)
    }

    /// The root node, creating it if the tree has none yet.
    ///
    /// The caller must hold the owning map's lock.
    ///
    /// # Panics
    /// If the reservation runs out.
    pub fn root_or_allocate<A: PhysicalPageAllocator + ?Sized>(
        &self,
        allocator: &A,
        reservation: &mut PageReservation,
    ) -> &'a PageTableNode {
        if let Some(root) = self.root_node() {
            return root;
        }

        let page = self.allocate_node(allocator, reservation);
        let node = self.node(page.base());
        if let Some(shared) = &self.tree.shared {
            for (index, entry) in shared.iter() {
                node.entry(index).store(entry);
            }
        }
        self.tree.root.store(page.base().as_u64(), Ordering::Release);
        node
    }

    /// Make sure root slot `index` points to a table.
    ///
    /// The caller must hold the owning map's lock.
    ///
    /// # Panics
    /// - If the reservation runs out.
    /// - If the slot holds a superpage.
    pub fn ensure_root_slot<A: PhysicalPageAllocator + ?Sized>(
        &self,
        index: TableIndex,
        allocator: &A,
        reservation: &mut PageReservation,
    ) {
        let root = self.root_or_allocate(allocator, reservation);
        let slot = root.entry(index);
        let entry = slot.load();
        if !entry.valid() {
            let page = self.allocate_node(allocator, reservation);
            slot.store(Pte::pointer(page, self.tree.global));
            return;
        }
        assert!(entry.is_pointer(), "superpage in root slot {}", index.as_usize());
    }

    fn allocate_node<A: PhysicalPageAllocator + ?Sized>(
        &self,
        allocator: &A,
        reservation: &mut PageReservation,
    ) -> PhysicalPageNumber {
        let Some(page) = allocator.allocate_page(reservation, PageState::Wired, PageAllocFlags::CLEAR) else {
            panic!("no zeroed page left in the reservation for a page table");
        };
        self.tree.table_pages.fetch_add(1, Ordering::Relaxed);
        debug!("allocated page table node {}", page.base());
        page
    }

    /// Call `f` with every existing leaf slot for the pages in `[start, end)`.
    ///
    /// Subtrees that do not exist are skipped as a whole.
    pub fn for_each_slot(
        &self,
        start: VirtualAddress,
        end: VirtualAddress,
        mut f: impl FnMut(VirtualAddress, &'a AtomicPte),
    ) {
        let mut va = start.page_base();
        while va < end {
            match self.leaf_table(va) {
                Ok(table) => {
                    let table_end = next_boundary(va, Level::Middle);
                    loop {
                        f(va, table.entry_for(va, Level::Leaf));
                        let Some(next) = va.checked_add(PAGE_SIZE) else {
                            return;
                        };
                        va = next;
                        if va >= end || Some(va) == table_end {
                            break;
                        }
                    }
                }
                Err(Miss::NoRoot) => return,
                Err(Miss::Entry { level, .. }) => match next_boundary(va, level) {
                    Some(next) => va = next,
                    None => return,
                },
            }
        }
    }

    /// Call `f` with every valid leaf entry owned by this tree, at any level.
    ///
    /// Entries reached through shared kernel slots of a user tree are not
    /// visited.
    pub fn visit_leaves(&self, mut f: impl FnMut(VirtualAddress, Level, Pte)) {
        let Some(root) = self.root_node() else {
            return;
        };
        for (i, slot) in root.entries() {
            let entry = slot.load();
            if !entry.valid() || !self.tree.owns_root_slot(i, entry) {
                continue;
            }
            self.visit_subtree(entry, Level::Root, i.as_usize() as u64, &mut f);
        }
    }

    fn visit_subtree(&self, entry: Pte, level: Level, prefix: u64, f: &mut impl FnMut(VirtualAddress, Level, Pte)) {
        if entry.is_leaf() {
            f(compose(prefix, level), level, entry);
            return;
        }
        let (Some(below), true) = (level.below(), entry.is_pointer()) else {
            return;
        };
        let node = self.node(entry.physical_address());
        for (i, slot) in node.entries() {
            let child = slot.load();
            if child.valid() {
                self.visit_subtree(child, below, (prefix << 9) | i.as_usize() as u64, f);
            }
        }
    }

    /// Call `f` with every valid last-level entry owned by this tree.
    pub fn for_each_leaf(&self, mut f: impl FnMut(VirtualAddress, Pte)) {
        self.visit_leaves(|va, level, pte| {
            if level == Level::Leaf {
                f(va, pte);
            }
        });
    }

    /// Return every node owned by the tree to `allocator` and detach the root.
    ///
    /// Mapped pages themselves are not touched. The caller must guarantee
    /// the tree is no longer in use anywhere. An adopted tree is left as is.
    pub fn free_tree<A: PhysicalPageAllocator + ?Sized>(&self, allocator: &A) {
        if self.tree.adopted {
            return;
        }
        let Some(root) = self.root_node() else {
            return;
        };
        for (i, slot) in root.entries() {
            let entry = slot.load();
            if entry.is_pointer() && self.tree.owns_root_slot(i, entry) {
                self.free_subtree(entry.ppn(), Level::Middle, allocator);
            }
        }
        let root_pa = self.tree.root.swap(0, Ordering::AcqRel);
        self.free_node(PhysicalAddress::new(root_pa).ppn(), allocator);
    }

    fn free_subtree<A: PhysicalPageAllocator + ?Sized>(&self, table: PhysicalPageNumber, level: Level, allocator: &A) {
        if let Some(below) = level.below() {
            let node = self.node(table.base());
            for (_, slot) in node.entries() {
                let entry = slot.load();
                if entry.is_pointer() {
                    self.free_subtree(entry.ppn(), below, allocator);
                }
            }
        }
        self.free_node(table, allocator);
    }

    fn free_node<A: PhysicalPageAllocator + ?Sized>(&self, page: PhysicalPageNumber, allocator: &A) {
        allocator.free_page(page, PageState::Free);
        self.tree.table_pages.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Start of the next region covered by one entry at `level`, or `None` at
/// the top of the address space.
fn next_boundary(va: VirtualAddress, level: Level) -> Option<VirtualAddress> {
    let span = level.entry_span();
    (va.as_u64() & !(span - 1)).checked_add(span).map(VirtualAddress::new)
}

/// The address whose page-number bits are `prefix`, where `prefix` holds the
/// indices from the root down to `level`.
fn compose(prefix: u64, level: Level) -> VirtualAddress {
    let raw = prefix << level.entry_span().trailing_zeros();
    if (raw >> 38) & 1 == 1 {
        VirtualAddress::new(raw | SIGN_EXTENSION)
    } else {
        VirtualAddress::new(raw)
    }
}

const _: () = assert!(ENTRIES_PER_TABLE == 1 << 9);
