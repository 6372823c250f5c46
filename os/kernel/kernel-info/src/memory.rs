//! # Memory Layout

use core::ops::Range;

/// Lowest user-space virtual address.
pub const USER_BASE: u64 = 0;

/// One past the highest user-space virtual address (lower canonical half).
pub const USER_TOP: u64 = 0x0000_0040_0000_0000;

/// Start of the kernel's half of the address space.
///
/// Every root-table entry from here upward belongs to the kernel map and is
/// shared by value with each user map when its root table is created.
pub const KERNEL_BASE: u64 = 0xffff_ffc0_0000_0000;

/// Size of the kernel range (the whole upper canonical half).
pub const KERNEL_SIZE: u64 = 0x0000_0040_0000_0000;

/// Base of the linear physical map window.
///
/// Any physical address `pa` below [`PHYSICAL_MAP_SIZE`] is reachable at
/// `PHYSICAL_MAP_BASE + pa`.
pub const PHYSICAL_MAP_BASE: u64 = KERNEL_BASE;

/// Size of the physical map window (128 GiB).
pub const PHYSICAL_MAP_SIZE: u64 = 0x0000_0020_0000_0000;

/// Bytes of virtual address space translated by one root-table entry (1 GiB).
pub const ROOT_ENTRY_SPAN: u64 = 1 << 30;

/// Root-table slots covering the kernel range.
pub const KERNEL_ROOT_INDICES: Range<usize> = root_index(KERNEL_BASE)..512;

#[allow(clippy::cast_possible_truncation)]
const fn root_index(va: u64) -> usize {
    ((va >> 30) & 0x1ff) as usize
}

const _: () = {
    assert!(KERNEL_BASE.wrapping_add(KERNEL_SIZE) == 0);
    assert!(PHYSICAL_MAP_BASE >= KERNEL_BASE);
    assert!(PHYSICAL_MAP_SIZE <= KERNEL_SIZE);
    assert!(PHYSICAL_MAP_SIZE.is_multiple_of(ROOT_ENTRY_SPAN));
    assert!(KERNEL_ROOT_INDICES.start == 256);
    assert!(root_index(USER_TOP - 1) + 1 == KERNEL_ROOT_INDICES.start);
    assert!(root_index(USER_BASE) == 0);
};
