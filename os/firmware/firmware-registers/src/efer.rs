#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// `IA32_EFER` (MSR `0xC000_0080`), reduced to the long-mode bits.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Efer {
    /// Bit 0, SCE: `SYSCALL`/`SYSRET`.
    pub sce: bool,

    /// Bits 1–7: Model specific or reserved.
    #[bits(7)]
    pub reserved0: u8,

    /// Bit 8, LME: Long Mode Enable.
    pub lme: bool,

    /// Bit 9: Reserved.
    pub reserved1: bool,

    /// Bit 10, LMA: Long Mode Active (read-only).
    pub lma: bool,

    /// Bit 11, NXE: the no-execute bit in page entries is honored.
    pub nxe: bool,

    /// Bits 12–63: Other extensions.
    #[bits(52)]
    pub reserved2: u64,
}

impl Efer {
    /// MSR index for `IA32_EFER`.
    pub const MSR_EFER: u32 = 0xC000_0080;
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        let (lo, hi): (u32, u32);
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") Self::MSR_EFER,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        Self::from_bits((u64::from(hi) << 32) | u64::from(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_mode_bits() {
        let efer = Efer::from_bits(0x0D00);
        assert!(efer.lme());
        assert!(efer.lma());
        assert!(efer.nxe());
        assert!(!efer.sce());
    }
}
