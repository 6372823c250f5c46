//! # Sv39 page-table entries
//!
//! Every level of an Sv39 tree uses the same 64-bit entry format:
//!
//! | Bits   | Name  | Meaning |
//! |--------|-------|---------|
//! | 0      | `V`   | Entry is valid |
//! | 1      | `R`   | Readable |
//! | 2      | `W`   | Writable |
//! | 3      | `X`   | Executable |
//! | 4      | `U`   | Accessible from user mode |
//! | 5      | `G`   | Global (present in all address spaces) |
//! | 6      | `A`   | Accessed |
//! | 7      | `D`   | Dirty |
//! | 8–9    | `RSW` | Reserved for software |
//! | 10–53  | `PPN` | Physical page number |
//! | 54–63  | -     | Reserved, must be zero |
//!
//! A valid entry with `R`, `W` and `X` all clear points to the next-level
//! table; any other valid entry is a leaf.
//!
//! Three views of the same word live here:
//! - [`Pte`]: the raw hardware word with typed bit accessors,
//! - [`PteFlags`]: the low eight bits as a flag set, used for atomic
//!   read-modify-write masks,
//! - [`PteAttributes`]: a plain decoded struct, convertible both ways with
//!   [`encode`] and [`decode`].

use bitfield_struct::bitfield;
use bitflags::bitflags;
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPageNumber};
use utils_accessors_derive::Setters;

/// One raw Sv39 page-table entry.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{Pte, PteFlags};
/// # use kernel_memory_addresses::PhysicalPageNumber;
/// let pte = Pte::leaf(PhysicalPageNumber::new(0x80), PteFlags::READ | PteFlags::WRITE, false);
/// assert!(pte.is_leaf());
/// assert_eq!(pte.into_bits(), (0x80 << 10) | 0b111);
/// ```
#[bitfield(u64, debug = false)]
#[derive(PartialEq, Eq, Hash)]
pub struct Pte {
    /// `V`, bit 0.
    pub valid: bool,
    /// `R`, bit 1.
    pub read: bool,
    /// `W`, bit 2.
    pub write: bool,
    /// `X`, bit 3.
    pub exec: bool,
    /// `U`, bit 4.
    pub user: bool,
    /// `G`, bit 5.
    pub global: bool,
    /// `A`, bit 6.
    pub accessed: bool,
    /// `D`, bit 7.
    pub dirty: bool,

    /// `RSW`, bits 8–9. Ignored by hardware.
    #[bits(2)]
    pub software: u8,

    /// `PPN`, bits 10–53.
    #[bits(44)]
    ppn_bits: u64,

    #[bits(10)]
    __: u16,
}

impl Pte {
    /// The all-zero (invalid) entry.
    pub const ZERO: Self = Self::new();

    /// A pointer to the next-level table at `table`.
    ///
    /// Kernel trees mark their intermediate entries global as well.
    #[inline]
    #[must_use]
    pub const fn pointer(table: PhysicalPageNumber, global: bool) -> Self {
        Self::new()
            .with_valid(true)
            .with_global(global)
            .with_ppn_bits(table.as_u64())
    }

    /// A leaf translating to `page` with the `R`/`W`/`X`/`U` bits in
    /// `permissions`; other bits in `permissions` are ignored.
    ///
    /// `A` and `D` start out clear.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPageNumber, permissions: PteFlags, global: bool) -> Self {
        let bits = PteFlags::VALID
            .union(permissions.intersection(PteFlags::PERMISSIONS))
            .bits();
        Self::from_bits(bits)
            .with_global(global)
            .with_ppn_bits(page.as_u64())
    }

    /// Physical page number stored in the entry.
    #[inline]
    #[must_use]
    pub const fn ppn(self) -> PhysicalPageNumber {
        PhysicalPageNumber::new(self.ppn_bits())
    }

    /// Replace the physical page number.
    #[inline]
    #[must_use]
    pub const fn with_ppn(self, ppn: PhysicalPageNumber) -> Self {
        self.with_ppn_bits(ppn.as_u64())
    }

    /// Physical address of the page or table this entry references.
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.ppn().base()
    }

    /// The low eight bits as a flag set.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.into_bits())
    }

    /// Valid and carrying at least one of `R`, `W`, `X`.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.valid() && self.flags().intersects(PteFlags::RWX)
    }

    /// Valid and carrying none of `R`, `W`, `X`.
    #[inline]
    #[must_use]
    pub const fn is_pointer(self) -> bool {
        self.valid() && !self.flags().intersects(PteFlags::RWX)
    }

    /// Replace the `R`/`W`/`X`/`U` bits, keeping everything else.
    #[inline]
    #[must_use]
    pub const fn with_permissions(self, permissions: PteFlags) -> Self {
        let keep = self.into_bits() & !PteFlags::PERMISSIONS.bits();
        let set = permissions.intersection(PteFlags::PERMISSIONS).bits();
        Self::from_bits(keep | set)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid() {
            return write!(f, "Pte(invalid, {:#x})", self.into_bits());
        }
        let flags = self.flags();
        let bit = |flag: PteFlags, c: char| if flags.contains(flag) { c } else { '-' };
        write!(
            f,
            "Pte({}{}{}{}{}{}{} -> {:?})",
            bit(PteFlags::READ, 'r'),
            bit(PteFlags::WRITE, 'w'),
            bit(PteFlags::EXEC, 'x'),
            bit(PteFlags::USER, 'u'),
            bit(PteFlags::GLOBAL, 'g'),
            bit(PteFlags::ACCESSED, 'a'),
            bit(PteFlags::DIRTY, 'd'),
            self.ppn()
        )
    }
}

bitflags! {
    /// The flag byte of a [`Pte`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PteFlags: u64 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXEC = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;

        /// Any of these makes a valid entry a leaf.
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
        /// The bits a protection change replaces.
        const PERMISSIONS = Self::RWX.bits() | Self::USER.bits();
        /// The bits the MMU (or fault handler) sets on use.
        const USAGE = Self::ACCESSED.bits() | Self::DIRTY.bits();
    }
}

/// Decoded, field-by-field view of a [`Pte`].
///
/// Built with the generated `with_*` setters and turned into a hardware
/// word by [`encode`]:
///
/// ```rust
/// # use kernel_vmem::{PteAttributes, decode, encode};
/// # use kernel_memory_addresses::PhysicalPageNumber;
/// let attrs = PteAttributes::default()
///     .with_valid(true)
///     .with_read(true)
///     .with_ppn(PhysicalPageNumber::new(0x1234));
/// assert_eq!(decode(encode(attrs)), attrs);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Setters)]
#[allow(clippy::struct_excessive_bools)]
pub struct PteAttributes {
    pub valid: bool,
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub user: bool,
    pub global: bool,
    pub accessed: bool,
    pub dirty: bool,
    /// Two software bits; higher bits are dropped by [`encode`].
    pub software: u8,
    pub ppn: PhysicalPageNumber,
}

/// Pack `attrs` into a hardware entry. The reserved high bits are always zero.
#[must_use]
pub const fn encode(attrs: PteAttributes) -> Pte {
    Pte::new()
        .with_valid(attrs.valid)
        .with_read(attrs.read)
        .with_write(attrs.write)
        .with_exec(attrs.exec)
        .with_user(attrs.user)
        .with_global(attrs.global)
        .with_accessed(attrs.accessed)
        .with_dirty(attrs.dirty)
        .with_software(attrs.software & 0b11)
        .with_ppn(attrs.ppn)
}

/// Unpack a hardware entry. The reserved high bits are ignored.
#[must_use]
pub const fn decode(pte: Pte) -> PteAttributes {
    PteAttributes {
        valid: pte.valid(),
        read: pte.read(),
        write: pte.write(),
        exec: pte.exec(),
        user: pte.user(),
        global: pte.global(),
        accessed: pte.accessed(),
        dirty: pte.dirty(),
        software: pte.software(),
        ppn: pte.ppn(),
    }
}

impl From<PteAttributes> for Pte {
    #[inline]
    fn from(value: PteAttributes) -> Self {
        encode(value)
    }
}

impl From<Pte> for PteAttributes {
    #[inline]
    fn from(value: Pte) -> Self {
        decode(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bit_positions() {
        let pte = encode(
            PteAttributes::default()
                .with_valid(true)
                .with_dirty(true)
                .with_software(0b10)
                .with_ppn(PhysicalPageNumber::new(1)),
        );
        assert_eq!(pte.into_bits(), (1 << 10) | (0b10 << 8) | (1 << 7) | 1);
    }

    #[test]
    fn pointer_and_leaf_are_distinguished() {
        let table = Pte::pointer(PhysicalPageNumber::new(0x42), true);
        assert!(table.is_pointer());
        assert!(!table.is_leaf());
        assert!(table.global());

        let leaf = Pte::leaf(PhysicalPageNumber::new(0x42), PteFlags::EXEC | PteFlags::DIRTY, false);
        assert!(leaf.is_leaf());
        assert!(!leaf.dirty(), "usage bits must not leak into a fresh leaf");

        assert!(!Pte::ZERO.is_leaf());
        assert!(!Pte::ZERO.is_pointer());
    }

    #[test]
    fn reserved_bits_are_ignored_on_decode() {
        let raw = Pte::from_bits((0x3ff << 54) | (0x99 << 10) | 0b11);
        let attrs = decode(raw);
        assert_eq!(attrs.ppn, PhysicalPageNumber::new(0x99));
        assert_eq!(encode(attrs).into_bits(), (0x99 << 10) | 0b11);
    }

    #[test]
    fn permissions_are_replaced_in_place() {
        let pte = Pte::leaf(PhysicalPageNumber::new(7), PteFlags::READ | PteFlags::WRITE | PteFlags::USER, false)
            .with_accessed(true)
            .with_dirty(true);
        let ro = pte.with_permissions(PteFlags::READ);
        assert!(ro.read() && !ro.write() && !ro.user());
        assert!(ro.accessed() && ro.dirty());
        assert_eq!(ro.ppn(), pte.ppn());
    }

    #[test]
    fn debug_format() {
        let pte = Pte::leaf(PhysicalPageNumber::new(0x80), PteFlags::READ | PteFlags::WRITE, true);
        assert_eq!(format!("{pte:?}"), "Pte(rw--g-- -> PPN(0x80))");
        assert_eq!(format!("{:?}", Pte::ZERO), "Pte(invalid, 0x0)");
    }

    fn attributes() -> impl Strategy<Value = PteAttributes> {
        (any::<[bool; 8]>(), 0u8..4, 0u64..=PhysicalPageNumber::MAX.as_u64()).prop_map(|(b, software, ppn)| {
            PteAttributes {
                valid: b[0],
                read: b[1],
                write: b[2],
                exec: b[3],
                user: b[4],
                global: b[5],
                accessed: b[6],
                dirty: b[7],
                software,
                ppn: PhysicalPageNumber::new(ppn),
            }
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(attrs in attributes()) {
            prop_assert_eq!(decode(encode(attrs)), attrs);
        }

        #[test]
        fn encode_never_sets_reserved_bits(attrs in attributes()) {
            prop_assert_eq!(encode(attrs).into_bits() >> 54, 0);
        }
    }
}
