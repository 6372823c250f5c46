use crate::{PAGE_SHIFT, PhysicalAddress, SV39_PPN_BITS};
use core::fmt;

/// Physical page number (PPN): a physical address divided by the page size.
///
/// This is the value Sv39 stores in bits 10..54 of a page-table entry and in
/// the low 44 bits of `satp`.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPageNumber(u64);

impl PhysicalPageNumber {
    /// Largest page number representable in an Sv39 entry.
    pub const MAX: Self = Self((1 << SV39_PPN_BITS) - 1);

    /// Construct from a raw page number.
    ///
    /// ### Debug assertions
    /// - Asserts the number fits into 44 bits.
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        debug_assert!(v <= Self::MAX.0, "PPN exceeds 44 bits");
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Physical address of the first byte of this page.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for PhysicalPageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PPN({:#x})", self.0)
    }
}

impl fmt::Display for PhysicalPageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<PhysicalAddress> for PhysicalPageNumber {
    /// Page number of the page containing `value` (rounds down).
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        value.ppn()
    }
}
