use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPageNumber};

/// `satp`: Supervisor Address Translation and Protection register (RV64).
///
/// Selects the translation mode and holds the physical page number of the
/// root page table plus the address-space identifier.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Satp {
    /// Bits 0–43: PPN of the root page table.
    #[bits(44)]
    root_ppn: u64,

    /// Bits 44–59: ASID (address-space identifier).
    #[bits(16)]
    pub asid: u16,

    /// Bits 60–63: MODE.
    #[bits(4)]
    pub mode: u8,
}

impl Satp {
    /// `MODE` value disabling translation.
    pub const MODE_BARE: u8 = 0;

    /// `MODE` value selecting three-level Sv39 translation.
    pub const MODE_SV39: u8 = 8;

    /// Build an Sv39 `satp` value for a root table at `root`.
    ///
    /// `root` must be 4 KiB-aligned.
    #[must_use]
    pub fn for_root(root: PhysicalAddress, asid: u16) -> Self {
        debug_assert!(root.is_page_aligned(), "root table must be 4K-aligned");
        Self::new()
            .with_mode(Self::MODE_SV39)
            .with_asid(asid)
            .with_root_ppn(root.ppn().as_u64())
    }

    /// Physical address of the root page table.
    #[must_use]
    pub fn root(&self) -> PhysicalAddress {
        PhysicalPageNumber::new(self.root_ppn()).base()
    }

    /// Returns `true` if Sv39 translation is enabled.
    #[must_use]
    pub fn is_sv39(&self) -> bool {
        self.mode() == Self::MODE_SV39
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl crate::LoadRegisterUnsafe for Satp {
    unsafe fn load_unsafe() -> Self {
        let satp: u64;
        unsafe {
            core::arch::asm!("csrr {}, satp", out(reg) satp, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(satp)
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl crate::StoreRegisterUnsafe for Satp {
    unsafe fn store_unsafe(self) {
        let satp = self.into_bits();
        unsafe {
            core::arch::asm!("csrw satp, {}", in(reg) satp, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_root_round_trips() {
        let satp = Satp::for_root(PhysicalAddress::new(0x8020_3000), 7);
        assert!(satp.is_sv39());
        assert_eq!(satp.asid(), 7);
        assert_eq!(satp.root(), PhysicalAddress::new(0x8020_3000));
        assert_eq!(satp.into_bits(), (8 << 60) | (7 << 44) | 0x80203);
    }
}
