#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// CR0 in 64-bit mode.
///
/// Only the bits relevant to paging are named; everything else is carried
/// through untouched in the spans.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Cr0 {
    /// Bit 0, PE: Protection Enable.
    pub pe: bool,

    /// Bits 1–15: MP, EM, TS, ET, NE and reserved bits.
    #[bits(15)]
    pub low: u16,

    /// Bit 16, WP: supervisor writes honor read-only pages.
    pub wp: bool,

    /// Bits 17–30: AM, NW, CD and reserved bits.
    #[bits(14)]
    pub mid: u16,

    /// Bit 31, PG: paging enabled (requires PE).
    pub pg: bool,

    /// Bits 32–63: Reserved.
    #[bits(32)]
    pub reserved: u32,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let mut cr0: u64;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}
