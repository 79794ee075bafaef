#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// CR4, reduced to the paging controls.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Cr4 {
    /// Bits 0–3: VME, PVI, TSD, DE.
    #[bits(4)]
    pub low: u8,

    /// Bit 4, PSE: Page Size Extensions (ignored under PAE).
    pub pse: bool,

    /// Bit 5, PAE: Physical Address Extension, required for long mode.
    pub pae: bool,

    /// Bit 6: MCE.
    pub mce: bool,

    /// Bit 7, PGE: global pages survive CR3 writes.
    pub pge: bool,

    /// Bits 8–11: PCE, OSFXSR, OSXMMEXCPT, UMIP.
    #[bits(4)]
    pub mid: u8,

    /// Bit 12, LA57: 5-level paging.
    pub la57: bool,

    /// Bits 13–16: VMXE, SMXE, reserved, FSGSBASE.
    #[bits(4)]
    pub virt: u8,

    /// Bit 17, PCIDE: process-context identifiers.
    pub pcide: bool,

    /// Bits 18–21: OSXSAVE, reserved, SMEP, SMAP.
    #[bits(4)]
    pub high: u8,

    /// Bit 22, PKE: protection keys.
    pub pke: bool,

    /// Bits 23–63: Reserved.
    #[bits(41)]
    pub reserved: u64,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let mut cr4: u64;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}
