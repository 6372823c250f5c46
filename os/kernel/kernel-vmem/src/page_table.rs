//! One 4 KiB node of an Sv39 tree and the indices that select its slots.

use crate::atomic_pte::AtomicPte;
use kernel_memory_addresses::{PAGE_SHIFT, VirtualAddress};

/// Number of entries in every table node.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Depth in the tree. The root is walked first.
///
/// | Level | Entry covers | Index bits |
/// |-------|--------------|------------|
/// | `Root` (2)   | 1 GiB | 38..30 |
/// | `Middle` (1) | 2 MiB | 29..21 |
/// | `Leaf` (0)   | 4 KiB | 20..12 |
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Leaf = 0,
    Middle = 1,
    Root = 2,
}

impl Level {
    #[inline]
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// The level a pointer entry at this level leads to.
    #[inline]
    #[must_use]
    pub const fn below(self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Middle),
            Self::Middle => Some(Self::Leaf),
            Self::Leaf => None,
        }
    }

    /// Bytes of address space mapped through one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << (PAGE_SHIFT + 9 * self.number() as u32)
    }
}

/// Index of a slot inside a [`PageTableNode`].
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// The slot `va` selects at `level`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn at_level(va: VirtualAddress, level: Level) -> Self {
        Self(va.vpn(level.number()) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `index < 512`.
    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        debug_assert!((index as usize) < ENTRIES_PER_TABLE);
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A page-aligned array of 512 [`AtomicPte`] slots.
///
/// Nodes are never constructed in Rust memory; they are viewed in place in
/// physical pages obtained from the page allocator with a zero fill.
#[repr(C, align(4096))]
pub struct PageTableNode {
    entries: [AtomicPte; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTableNode>() == 4096);

impl PageTableNode {
    #[inline]
    #[must_use]
    pub const fn entry(&self, index: TableIndex) -> &AtomicPte {
        &self.entries[index.as_usize()]
    }

    /// The slot `va` selects when this node sits at `level`.
    #[inline]
    #[must_use]
    pub const fn entry_for(&self, va: VirtualAddress, level: Level) -> &AtomicPte {
        self.entry(TableIndex::at_level(va, level))
    }

    /// All slots, in index order.
    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (TableIndex, &AtomicPte)> {
        (0u16..).zip(self.entries.iter()).map(|(i, e)| (TableIndex(i), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans() {
        assert_eq!(Level::Leaf.entry_span(), 4096);
        assert_eq!(Level::Middle.entry_span(), 2 << 20);
        assert_eq!(Level::Root.entry_span(), 1 << 30);
    }

    #[test]
    fn indices_follow_the_address_bits() {
        let va = VirtualAddress::new(0xFFFF_FFC0_4060_3000);
        assert_eq!(TableIndex::at_level(va, Level::Root).as_usize(), 0x101);
        assert_eq!(TableIndex::at_level(va, Level::Middle).as_usize(), 0x003);
        assert_eq!(TableIndex::at_level(va, Level::Leaf).as_usize(), 0x003);
    }

    #[test]
    fn walk_order() {
        assert_eq!(Level::Root.below(), Some(Level::Middle));
        assert_eq!(Level::Middle.below(), Some(Level::Leaf));
        assert_eq!(Level::Leaf.below(), None);
    }
}
