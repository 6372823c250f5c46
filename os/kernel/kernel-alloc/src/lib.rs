//! # Kernel Physical Memory Allocation
//!
//! Physical page management for the Sv39 kernel: the page allocator the
//! translation maps draw their table nodes from, and the physical page mapper
//! used to reach physical memory without a translation-map entry.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │           Translation Maps (kernel-vmem)            │
//! │    • reserve worst-case table nodes up front        │
//! │    • draw wired, zeroed pages while walking         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Page Allocator                   │
//! │    • reservations (pre-charged page counts)         │
//! │    • bitmap free/used tracking, per-page state      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Page Mapper                   │
//! │    • linear physical map window                     │
//! │    • bulk copy / fill of physical memory            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical Page Allocator ([`frame_alloc`])
//! * **Reservations**: [`PageReservation`] pre-charges pages so that later
//!   allocation cannot fail halfway through a page-table walk
//! * **Page States**: every page carries a [`PageState`] (free, wired,
//!   active, cached, ...) that the VM layer moves pages between
//! * **Zero Fill**: [`PageAllocFlags::CLEAR`] clears the page through the mapper
//!
//! ### Physical Page Mapper ([`phys_mapper`])
//! * **Window Translation**: `virtual = physical + offset`
//! * **Bulk Operations**: copy to/from physical memory, fill, page copy
//! * **Fault Propagation**: faults on the non-physical side of a copy are
//!   returned as [`PhysMapperError::BadAddress`](phys_mapper::PhysMapperError::BadAddress)
//!
//! ## Usage Patterns
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapPageAllocator, PhysicalPageAllocator};
//! use kernel_alloc::phys_mapper::OffsetPhysMapper;
//! use kernel_alloc::{PageAllocFlags, PageState};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! # #[repr(C, align(4096))] struct Page([u8; 4096]);
//! let mut ram: Vec<Page> = (0..8).map(|_| Page([0; 4096])).collect();
//! let base = PhysicalAddress::new(0x8000_0000);
//! let mapper = OffsetPhysMapper::for_buffer(ram.as_mut_ptr().cast(), base, 8 * 4096);
//! let allocator = BitmapPageAllocator::new(mapper, base, 8);
//!
//! let mut reservation = allocator.reserve(2).unwrap();
//! let page = allocator
//!     .allocate_page(&mut reservation, PageState::Wired, PageAllocFlags::CLEAR)
//!     .unwrap();
//! allocator.free_page(page, PageState::Free);
//! allocator.unreserve(reservation);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod frame_alloc;
mod page;
pub mod phys_mapper;
mod reservation;

pub use crate::frame_alloc::{AllocError, PhysicalPageAllocator};
pub use crate::page::{PageAllocFlags, PageState};
pub use crate::reservation::PageReservation;
