//! # Kernel Configuration
//!
//! Memory layout constants and tuning parameters shared by the Sv39 paging
//! crates. Everything here is a compile-time constant; layout relationships
//! are checked with `const` assertions so that an inconsistent configuration
//! fails the build instead of corrupting page tables at run time.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **User range**: the lower canonical half of the Sv39 address space
//! * **Kernel range**: the upper canonical half, shared by every address space
//!   through the kernel's root-table entries
//! * **Physical map window**: a linear mapping of all physical memory used to
//!   reach page-table nodes and arbitrary physical pages
//!
//! ### Tuning ([`tuning`])
//! Performance knobs that do not affect correctness, such as the number of
//! pending TLB invalidations batched before falling back to a full flush.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Sv39 Virtual Address Space Layout:
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐ USER_BASE
//!                       │          User Space             │ root slots 0..256
//! 0x0000_003F_FFFF_FFFF ├─────────────────────────────────┤ USER_TOP (exclusive)
//!                       │   (non-canonical, unusable)     │
//! 0xFFFF_FFC0_0000_0000 ├─────────────────────────────────┤ KERNEL_BASE
//!                       │     Physical Map Window         │ PHYSICAL_MAP_BASE
//! 0xFFFF_FFE0_0000_0000 ├─────────────────────────────────┤
//!                       │   Kernel Image, Heap, Areas     │ root slots 256..512
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kernel_info::memory::{KERNEL_BASE, KERNEL_ROOT_INDICES};
//!
//! assert_eq!((KERNEL_BASE >> 30) & 0x1ff, KERNEL_ROOT_INDICES.start as u64);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod tuning;
