//! # Sv39 Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and page numbers used by
//! the RISC-V Sv39 paging code.
//!
//! ## Overview
//!
//! Sv39 translates 39-bit virtual addresses through a three-level tree of
//! 4 KiB page tables into 56-bit physical addresses. The types in this crate
//! keep the two address kinds apart at compile time while remaining zero-cost
//! wrappers around `u64`:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address in some (kernel or user) address space. |
//! | [`PhysicalAddress`] | A machine bus address (RAM or MMIO). |
//! | [`PhysicalPageNumber`] | A physical address shifted right by [`PAGE_SHIFT`]. |
//!
//! ## Sv39 Virtual Address Layout
//!
//! ```text
//! | 63‒39    | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | sign ext | VPN2  | VPN1  | VPN0  | Offset |
//! ```
//!
//! Bits 63‒39 must all equal bit 38 ("canonical" addresses). The lower half
//! (`0x0000_0000_0000_0000 ..= 0x0000_003F_FFFF_FFFF`) is conventionally used
//! for user space, the upper half (`0xFFFF_FFC0_0000_0000 ..`) for the kernel.
//!
//! Only 4 KiB pages exist at this layer; superpages are not supported.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0012_3456_789A);
//! assert_eq!(va.page_base().as_u64(), 0x0000_0012_3456_7000);
//! assert_eq!(va.page_offset(), 0x89A);
//!
//! let pa = PhysicalAddress::new(0x8020_1000);
//! assert_eq!(pa.ppn().as_u64(), 0x80201);
//! assert_eq!(pa.ppn().base(), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_number;
mod physical_address;
mod virtual_address;

pub use crate::page_number::PhysicalPageNumber;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// log2 of the base page size.
pub const PAGE_SHIFT: u32 = 12;

/// Base page size (4 KiB).
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Mask selecting the in-page offset bits.
pub const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Number of significant virtual address bits in Sv39.
pub const SV39_VA_BITS: u32 = 39;

/// Number of bits in an Sv39 physical page number.
pub const SV39_PPN_BITS: u32 = 44;

/// Returns `true` if `x` is a multiple of [`PAGE_SIZE`].
#[inline(always)]
#[must_use]
pub const fn is_page_aligned(x: u64) -> bool {
    x & PAGE_OFFSET_MASK == 0
}
