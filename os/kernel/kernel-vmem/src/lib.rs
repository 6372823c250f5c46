//! # Virtual Memory Support
//!
//! Sv39 translation maps for a RISC-V kernel: encoding page-table entries,
//! walking and growing the three-level tree, mapping and protecting pages,
//! and keeping every hart's TLB coherent with the tree.
//!
//! ## What you get
//! - A [`Pte`] codec with the Sv39 bit layout, plus [`encode`]/[`decode`]
//!   to and from plain [`PteAttributes`].
//! - [`AtomicPte`], the 64-bit entry word updated with CAS and fetch-ops.
//! - A [`Walker`] over a [`PageTree`], creating intermediate tables on demand.
//! - [`TranslationMap`], one address space's tree with its lock,
//!   invalidation batch and mapped-page accounting.
//! - [`Platform`], the hooks to the machine: hart identity, `sfence.vma`,
//!   shootdown IPIs, physical memory access and the page allocator.
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! Each 39-bit virtual address is divided into four fields. Bits 63‒39 must
//! equal bit 38.
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | VPN2  | VPN1  | VPN0  | Offset |
//! ```
//!
//! The MMU uses the three VPN fields as **indices** into three levels of page
//! tables, each holding 512 (2⁹) entries of 8 bytes.
//!
//! ```text
//!  satp.PPN → root (L2) → middle (L1) → leaf (L0) → Physical Page
//!                │            │             │
//!                │            │             └───► leaf entry → maps 4 KiB page
//!                │            └─────────────────► pointer, or 2 MiB superpage (not created here)
//!                └──────────────────────────────► pointer, or 1 GiB superpage (not created here)
//! ```
//!
//! ### Levels
//!
//! | Level | Index | Span per entry | Role |
//! |:------|:------|:---------------|:-----|
//! | 2 | `VPN2` | 1 GiB | Root, referenced by `satp`. Slots 256‒511 hold the kernel half and are shared with every user tree. |
//! | 1 | `VPN1` | 2 MiB | Middle table. |
//! | 0 | `VPN0` | 4 KiB | Leaf table; every valid entry maps one page. |
//!
//! ### Leaf vs. pointer entries
//!
//! A valid entry with any of `R`/`W`/`X` set is a **leaf**; a valid entry with
//! none of them points to the next table. This crate only installs leaves at
//! level 0.
//!
//! ### Accessed and dirty
//!
//! The MMU (or a fault handler on harts without hardware updating) sets `A`
//! when it uses a translation and `D` on the first write. A translation
//! without `A` was never cached, which is what lets the maps skip most
//! `sfence.vma` work.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod atomic_pte;
pub mod cpu_set;
pub mod error;
pub mod flags;
pub mod invalidation;
pub mod page_table;
pub mod platform;
pub mod pte;
pub mod translation_map;
pub mod vm;
pub mod walker;

pub use crate::atomic_pte::AtomicPte;
pub use crate::cpu_set::{AtomicCpuSet, CpuId, CpuSet};
pub use crate::error::{MapError, TmapError};
pub use crate::flags::{MemoryType, PageFlags, Protection};
pub use crate::invalidation::{DrainedBatch, InvalidationBatch, InvalidationPlan, Shootdown};
pub use crate::page_table::{Level, PageTableNode, TableIndex};
pub use crate::platform::{CpuPinner, Platform};
pub use crate::pte::{Pte, PteAttributes, PteFlags, decode, encode};
pub use crate::translation_map::{
    InterruptContext, MapLocker, NonBlockingTranslationMap, PageUsage, QueryResult, TranslationMap,
};
pub use crate::vm::{AreaId, AreaWiring, CacheKind, MappingRecord, PageStore, VmArea};
pub use crate::walker::{KernelRootSlice, Miss, PageTree, Walker};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
