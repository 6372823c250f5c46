use crate::{PAGE_OFFSET_MASK, PAGE_SHIFT, SV39_VA_BITS, is_page_aligned};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Bits of VA covered by one page-table index.
const VPN_BITS: u32 = 9;

/// Mask for one page-table index.
const VPN_MASK: u64 = (1 << VPN_BITS) - 1;

/// Virtual memory address.
///
/// A thin wrapper around `u64` that denotes **virtual** addresses. It does
/// not enforce canonicality; use [`is_canonical`](Self::is_canonical) when a
/// value comes from an untrusted source.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xFFFF_FFC0_1234_5678);
/// assert!(va.is_canonical());
/// assert_eq!(va.vpn(2), 0x100);
/// assert_eq!(va.vpn(1), 0x091);
/// assert_eq!(va.vpn(0), 0x145);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        is_page_aligned(self.0)
    }

    /// The base of the 4 KiB page containing this address.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(self.0 & !PAGE_OFFSET_MASK)
    }

    /// The byte offset of this address within its 4 KiB page.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & PAGE_OFFSET_MASK
    }

    /// Returns `true` if bits 63..39 are copies of bit 38.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let upper = self.0 >> (SV39_VA_BITS - 1);
        upper == 0 || upper == u64::MAX >> (SV39_VA_BITS - 1)
    }

    /// The 9-bit virtual page number field selecting the entry at `level`
    /// (0 = leaf table, 2 = root table).
    ///
    /// ### Debug assertions
    /// - Asserts `level <= 2`.
    #[inline]
    #[must_use]
    pub const fn vpn(self, level: u8) -> usize {
        debug_assert!(level <= 2);
        ((self.0 >> (PAGE_SHIFT + VPN_BITS * level as u32)) & VPN_MASK) as usize
    }

    /// Checked addition, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpn_fields() {
        let va = VirtualAddress::new((3 << 30) | (5 << 21) | (7 << 12) | 0x123);
        assert_eq!(va.vpn(2), 3);
        assert_eq!(va.vpn(1), 5);
        assert_eq!(va.vpn(0), 7);
        assert_eq!(va.page_offset(), 0x123);
    }

    #[test]
    fn canonical_halves() {
        assert!(VirtualAddress::new(0).is_canonical());
        assert!(VirtualAddress::new(0x0000_003F_FFFF_FFFF).is_canonical());
        assert!(!VirtualAddress::new(0x0000_0040_0000_0000).is_canonical());
        assert!(VirtualAddress::new(0xFFFF_FFC0_0000_0000).is_canonical());
        assert!(!VirtualAddress::new(0xFFFF_FF80_0000_0000).is_canonical());
    }
}
