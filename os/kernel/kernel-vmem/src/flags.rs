//! Caller-facing protection and page-state flags.
//!
//! These are the values the VM layer passes in and gets back; they are
//! translated to and from [`PteFlags`] at the map boundary.

use crate::pte::PteFlags;
use bitflags::bitflags;

bitflags! {
    /// Requested access rights for a mapping.
    ///
    /// If any of the user bits is present the mapping becomes a user page
    /// and only the user bits are honored. Otherwise the kernel bits
    /// select the permissions of a supervisor-only page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u32 {
        /// User-mode read.
        const READ = 1 << 0;
        /// User-mode write.
        const WRITE = 1 << 1;
        /// User-mode execute.
        const EXECUTE = 1 << 2;
        /// Supervisor read.
        const KERNEL_READ = 1 << 4;
        /// Supervisor write.
        const KERNEL_WRITE = 1 << 5;
        /// Supervisor execute.
        const KERNEL_EXECUTE = 1 << 6;

        const USER = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
        const KERNEL = Self::KERNEL_READ.bits() | Self::KERNEL_WRITE.bits() | Self::KERNEL_EXECUTE.bits();
    }
}

impl Protection {
    /// Returns `true` if this requests a user-accessible page.
    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.intersects(Self::USER)
    }

    /// The `R`/`W`/`X`/`U` bits of a leaf entry granting this protection.
    ///
    /// Sv39 reserves the encoding "writable but not readable", so a write
    /// grant always implies read.
    #[must_use]
    pub const fn leaf_flags(self) -> PteFlags {
        let (read, write, exec) = if self.is_user() {
            (Self::READ, Self::WRITE, Self::EXECUTE)
        } else {
            (Self::KERNEL_READ, Self::KERNEL_WRITE, Self::KERNEL_EXECUTE)
        };

        let mut bits = PteFlags::empty();
        if self.contains(read) || self.contains(write) {
            bits = bits.union(PteFlags::READ);
        }
        if self.contains(write) {
            bits = bits.union(PteFlags::WRITE);
        }
        if self.contains(exec) {
            bits = bits.union(PteFlags::EXEC);
        }
        if self.is_user() {
            bits = bits.union(PteFlags::USER);
        }
        bits
    }
}

bitflags! {
    /// Per-page state as reported by [`query`](crate::TranslationMap::query).
    ///
    /// The permission bits mirror [`Protection`]; [`ACCESSED`](Self::ACCESSED)
    /// and [`MODIFIED`](Self::MODIFIED) are also the flags accepted by
    /// [`set_flags`](crate::NonBlockingTranslationMap::set_flags) and
    /// [`clear_flags`](crate::TranslationMap::clear_flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u32 {
        const READ = Protection::READ.bits();
        const WRITE = Protection::WRITE.bits();
        const EXECUTE = Protection::EXECUTE.bits();
        const KERNEL_READ = Protection::KERNEL_READ.bits();
        const KERNEL_WRITE = Protection::KERNEL_WRITE.bits();
        const KERNEL_EXECUTE = Protection::KERNEL_EXECUTE.bits();

        /// The page has been read or written since the bit was last cleared.
        const ACCESSED = 1 << 8;
        /// The page has been written since the bit was last cleared.
        const MODIFIED = 1 << 9;
        /// A valid translation exists.
        const PRESENT = 1 << 10;
    }
}

impl PageFlags {
    /// Decode the flags reported for a leaf entry with `bits`.
    #[must_use]
    pub const fn from_leaf(bits: PteFlags) -> Self {
        if !bits.contains(PteFlags::VALID) {
            return Self::empty();
        }

        let (read, write, exec) = if bits.contains(PteFlags::USER) {
            (Self::READ, Self::WRITE, Self::EXECUTE)
        } else {
            (Self::KERNEL_READ, Self::KERNEL_WRITE, Self::KERNEL_EXECUTE)
        };

        let mut flags = Self::PRESENT;
        if bits.contains(PteFlags::READ) {
            flags = flags.union(read);
        }
        if bits.contains(PteFlags::WRITE) {
            flags = flags.union(write);
        }
        if bits.contains(PteFlags::EXEC) {
            flags = flags.union(exec);
        }
        if bits.contains(PteFlags::ACCESSED) {
            flags = flags.union(Self::ACCESSED);
        }
        if bits.contains(PteFlags::DIRTY) {
            flags = flags.union(Self::MODIFIED);
        }
        flags
    }

    /// The hardware `A`/`D` bits named by [`ACCESSED`](Self::ACCESSED) and
    /// [`MODIFIED`](Self::MODIFIED).
    #[must_use]
    pub const fn usage_bits(self) -> PteFlags {
        let mut bits = PteFlags::empty();
        if self.contains(Self::ACCESSED) {
            bits = bits.union(PteFlags::ACCESSED);
        }
        if self.contains(Self::MODIFIED) {
            bits = bits.union(PteFlags::DIRTY);
        }
        bits
    }
}

impl From<Protection> for PageFlags {
    #[inline]
    fn from(value: Protection) -> Self {
        Self::from_bits_truncate(value.bits())
    }
}

/// Caching attribute requested for a mapping.
///
/// Base Sv39 has no page-based memory types (that needs Svpbmt), so the
/// value is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    #[default]
    WriteBack,
    WriteThrough,
    WriteCombining,
    Uncached,
    StrongUncached,
}
