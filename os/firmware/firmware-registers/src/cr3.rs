#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use firmware_addresses::PhysicalAddress;

/// CR3 with PCID disabled.
///
/// Holds the physical base of the PML4 plus the cache controls used for the
/// PML4 fetch itself.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Cr3 {
    /// Bits 0–2: Reserved.
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3: PWT for the PML4 fetch.
    pub pwt: bool,

    /// Bit 4: PCD for the PML4 fetch.
    pub pcd: bool,

    /// Bits 5–11: Reserved.
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–51: PML4 physical base >> 12.
    #[bits(40)]
    pml4_frame: u64,

    /// Bits 52–63: Reserved.
    #[bits(12)]
    pub reserved2: u16,
}

impl Cr3 {
    /// CR3 value pointing at the PML4 in `pml4_phys` (must be 4 KiB aligned).
    #[must_use]
    pub const fn from_pml4_phys(pml4_phys: PhysicalAddress) -> Self {
        debug_assert!(pml4_phys.as_u64() & 0xFFF == 0, "PML4 base must be 4K-aligned");
        Self::new().with_pml4_frame(pml4_phys.as_u64() >> 12)
    }

    /// Physical address of the PML4.
    #[must_use]
    pub const fn pml4_phys(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.pml4_frame() << 12)
    }

    /// This value with the PML4 base replaced and the cache flags kept.
    #[must_use]
    pub const fn with_pml4_phys(self, pml4_phys: PhysicalAddress) -> Self {
        self.with_pml4_frame(pml4_phys.as_u64() >> 12)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr3 {
    /// Writing CR3 also flushes every non-global TLB entry.
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
