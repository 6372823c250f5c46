//! Address-translation and instruction fences.
//!
//! On anything but `riscv64` with the `asm` feature these compile to nothing,
//! so callers can stay unconditional.

/// `sfence.vma va, zero`: drop cached translations of one page on this hart.
///
/// # Safety
/// Supervisor mode only.
#[inline]
#[allow(unused_variables)]
pub unsafe fn sfence_vma_page(va: u64) {
    #[cfg(all(feature = "asm", target_arch = "riscv64"))]
    unsafe {
        core::arch::asm!("sfence.vma {}, zero", in(reg) va, options(nostack, preserves_flags));
    };
}

/// `sfence.vma zero, zero`: drop all cached translations on this hart,
/// including global ones.
///
/// # Safety
/// Supervisor mode only.
#[inline]
pub unsafe fn sfence_vma_all() {
    #[cfg(all(feature = "asm", target_arch = "riscv64"))]
    unsafe {
        core::arch::asm!("sfence.vma zero, zero", options(nostack, preserves_flags));
    };
}

/// `sfence.vma zero, asid`: drop non-global translations of one address
/// space on this hart.
///
/// # Safety
/// Supervisor mode only.
#[inline]
#[allow(unused_variables)]
pub unsafe fn sfence_vma_asid(asid: u16) {
    #[cfg(all(feature = "asm", target_arch = "riscv64"))]
    unsafe {
        core::arch::asm!("sfence.vma zero, {}", in(reg) u64::from(asid), options(nostack, preserves_flags));
    };
}

/// `fence.i`: synchronize instruction fetch with prior stores on this hart.
///
/// # Safety
/// Always safe to execute; `unsafe` to match the other fences.
#[inline]
pub unsafe fn fence_i() {
    #[cfg(all(feature = "asm", target_arch = "riscv64"))]
    unsafe {
        core::arch::asm!("fence.i", options(nostack, preserves_flags));
    };
}
