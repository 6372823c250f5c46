//! # Physical Page Mapper
//!
//! Access to arbitrary physical memory without a translation-map entry.
//!
//! ## Why is this needed?
//! - Code can only dereference virtual addresses, not physical ones.
//! - Page-table nodes, freshly allocated pages and DMA buffers are known by
//!   their physical address only.
//! - The mapping strategy differs between the kernel (a linear window in the
//!   upper half) and host-side tests (a heap buffer), so the [`PhysMapper`]
//!   trait abstracts over it.
//!
//! ## How does it work?
//! Sv39 kernels map all physical memory linearly at
//! [`PHYSICAL_MAP_BASE`](kernel_info::memory::PHYSICAL_MAP_BASE). With such a
//! window, [`get_page`](PhysMapper::get_page) and
//! [`put_page`](PhysMapper::put_page) acquire nothing; they exist so callers
//! written against architectures with temporary mapping slots work unchanged.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::{OffsetPhysMapper, PhysMapper};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let mut ram = vec![0u8; 2 * 4096];
//! let base = PhysicalAddress::new(0x8000_0000);
//! let mapper = OffsetPhysMapper::for_buffer(ram.as_mut_ptr(), base, ram.len() as u64);
//!
//! mapper.memset_physical(base + 4096, 0xAB, 16).unwrap();
//! let mut out = [0u8; 16];
//! mapper.memcpy_from_physical(&mut out[..], base + 4096).unwrap();
//! assert_eq!(out, [0xAB; 16]);
//! ```

use core::fmt;
use kernel_info::memory::{PHYSICAL_MAP_BASE, PHYSICAL_MAP_SIZE};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Errors reported by [`PhysMapper`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhysMapperError {
    /// The non-physical side of a copy faulted (e.g. an unmapped user buffer).
    #[error("bad address in copy buffer at offset {offset:#x}")]
    BadAddress { offset: usize },

    /// The physical range is not covered by the physical map window.
    #[error("physical range {start}+{len:#x} lies outside the physical map window")]
    OutOfWindow { start: PhysicalAddress, len: u64 },
}

/// A copy through [`UserMemory`] hit an inaccessible byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFault {
    /// Offset into the buffer where the access failed.
    pub offset: usize,
}

impl From<MemoryFault> for PhysMapperError {
    fn from(value: MemoryFault) -> Self {
        Self::BadAddress {
            offset: value.offset,
        }
    }
}

/// The non-physical side of a bulk copy.
///
/// Kernel buffers (`[u8]`) never fault. User buffers go through the user
/// memory accessors, which report a [`MemoryFault`] instead of crashing.
pub trait UserMemory {
    /// Number of bytes in the buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the buffer.
    ///
    /// # Errors
    /// Returns the faulting offset if any byte cannot be read.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), MemoryFault>;

    /// Copy `src` into the buffer starting at `offset`.
    ///
    /// # Errors
    /// Returns the faulting offset if any byte cannot be written.
    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), MemoryFault>;
}

impl UserMemory for [u8] {
    #[inline]
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), MemoryFault> {
        let src = self
            .get(offset..offset + dst.len())
            .ok_or(MemoryFault { offset })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), MemoryFault> {
        let dst = self
            .get_mut(offset..offset + src.len())
            .ok_or(MemoryFault { offset })?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// Token returned by [`PhysMapper::get_page`], handed back to
/// [`PhysMapper::put_page`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "pages obtained with `get_page` must be released with `put_page`"]
pub struct PhysPageHandle {
    page: PhysicalAddress,
}

impl PhysPageHandle {
    /// The physical page this handle refers to.
    #[must_use]
    pub const fn page(&self) -> PhysicalAddress {
        self.page
    }
}

/// Access to physical memory from the current address space.
pub trait PhysMapper {
    /// Translate a physical range into the virtual address of its first byte.
    ///
    /// # Errors
    /// [`PhysMapperError::OutOfWindow`] if any byte of `pa..pa + len` is not
    /// reachable.
    fn phys_to_virt(&self, pa: PhysicalAddress, len: u64) -> Result<VirtualAddress, PhysMapperError>;

    /// Make the page containing `pa` accessible and return its virtual address.
    ///
    /// # Errors
    /// [`PhysMapperError::OutOfWindow`] if the page is not reachable.
    fn get_page(&self, pa: PhysicalAddress) -> Result<(VirtualAddress, PhysPageHandle), PhysMapperError> {
        let page = pa.page_base();
        let va = self.phys_to_virt(page, PAGE_SIZE)?;
        Ok((va + pa.page_offset(), PhysPageHandle { page }))
    }

    /// Release a page obtained with [`get_page`](Self::get_page).
    fn put_page(&self, va: VirtualAddress, handle: PhysPageHandle) {
        let _ = (va, handle);
    }

    /// Copy `from` into physical memory at `to`.
    ///
    /// # Errors
    /// [`PhysMapperError::BadAddress`] if `from` faults, or
    /// [`PhysMapperError::OutOfWindow`].
    fn memcpy_to_physical<S: UserMemory + ?Sized>(&self, to: PhysicalAddress, from: &S) -> Result<(), PhysMapperError> {
        let len = from.len();
        let dst = unsafe { self.window_slice(to, len)? };
        from.read_at(0, dst)?;
        Ok(())
    }

    /// Copy physical memory at `from` into `to`.
    ///
    /// # Errors
    /// [`PhysMapperError::BadAddress`] if `to` faults, or
    /// [`PhysMapperError::OutOfWindow`].
    fn memcpy_from_physical<D: UserMemory + ?Sized>(&self, to: &mut D, from: PhysicalAddress) -> Result<(), PhysMapperError> {
        let len = to.len();
        let src = unsafe { self.window_slice(from, len)? };
        to.write_at(0, src)?;
        Ok(())
    }

    /// Fill `len` bytes of physical memory at `pa` with `value`.
    ///
    /// # Errors
    /// [`PhysMapperError::OutOfWindow`].
    fn memset_physical(&self, pa: PhysicalAddress, value: u8, len: usize) -> Result<(), PhysMapperError> {
        let dst = unsafe { self.window_slice(pa, len)? };
        dst.fill(value);
        Ok(())
    }

    /// Copy one whole page.
    ///
    /// # Errors
    /// [`PhysMapperError::OutOfWindow`].
    fn memcpy_physical_page(&self, to: PhysicalAddress, from: PhysicalAddress) -> Result<(), PhysMapperError> {
        debug_assert!(to.is_page_aligned() && from.is_page_aligned());
        let src = self.phys_to_virt(from, PAGE_SIZE)?;
        let dst = self.phys_to_virt(to, PAGE_SIZE)?;
        if src == dst {
            return Ok(());
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = PAGE_SIZE as usize;
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_u64() as *const u8, dst.as_u64() as *mut u8, len);
        }
        Ok(())
    }

    /// View `len` bytes of physical memory at `pa` as a mutable slice.
    ///
    /// # Safety
    /// The memory must not be concurrently accessed through another slice.
    #[doc(hidden)]
    unsafe fn window_slice<'a>(&self, pa: PhysicalAddress, len: usize) -> Result<&'a mut [u8], PhysMapperError> {
        let va = self.phys_to_virt(pa, len as u64)?;
        Ok(unsafe { core::slice::from_raw_parts_mut(va.as_u64() as *mut u8, len) })
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress, len: u64) -> Result<VirtualAddress, PhysMapperError> {
        (**self).phys_to_virt(pa, len)
    }
}

/// [`PhysMapper`] for a linear window: `virtual = physical + offset`.
///
/// The kernel uses [`OffsetPhysMapper::kernel`]. Host tests point the window
/// at a heap buffer with [`OffsetPhysMapper::for_buffer`] so page tables can
/// be built and inspected in ordinary memory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OffsetPhysMapper {
    offset: u64,
    window_start: u64,
    window_end: u64,
}

impl OffsetPhysMapper {
    /// Physical window `[start, start + size)` reachable at `start + offset`.
    #[must_use]
    pub const fn new(offset: u64, start: PhysicalAddress, size: u64) -> Self {
        Self {
            offset,
            window_start: start.as_u64(),
            window_end: start.as_u64() + size,
        }
    }

    /// The kernel's physical map window.
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(PHYSICAL_MAP_BASE, PhysicalAddress::zero(), PHYSICAL_MAP_SIZE)
    }

    /// Treat `size` bytes at `buffer` as physical memory starting at `base`.
    #[must_use]
    pub fn for_buffer(buffer: *mut u8, base: PhysicalAddress, size: u64) -> Self {
        Self::new((buffer as u64).wrapping_sub(base.as_u64()), base, size)
    }

    /// The constant added to a physical address.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    const fn covers(&self, pa: u64, len: u64) -> bool {
        match pa.checked_add(len) {
            Some(end) => pa >= self.window_start && end <= self.window_end,
            None => false,
        }
    }
}

impl PhysMapper for OffsetPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress, len: u64) -> Result<VirtualAddress, PhysMapperError> {
        if !self.covers(pa.as_u64(), len) {
            return Err(PhysMapperError::OutOfWindow { start: pa, len });
        }
        Ok(VirtualAddress::new(pa.as_u64().wrapping_add(self.offset)))
    }
}

impl fmt::Debug for OffsetPhysMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetPhysMapper")
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("window", &format_args!("{:#x}..{:#x}", self.window_start, self.window_end))
            .finish()
    }
}
