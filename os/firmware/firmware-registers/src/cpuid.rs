//! Extended CPUID leaves the page table editor cares about.

use bitfield_struct::bitfield;

/// Highest extended leaf query.
pub const EXTENDED_MAX_LEAF: u32 = 0x8000_0000;

/// Extended processor signature and feature bits.
pub const EXTENDED_FEATURES_LEAF: u32 = 0x8000_0001;

/// Virtual and physical address sizes.
pub const ADDRESS_SIZES_LEAF: u32 = 0x8000_0008;

/// `EDX` of leaf `0x8000_0001`, reduced to the paging-related bits.
#[bitfield(u32, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct ExtendedFeatures {
    /// Bits 0–10: Reserved or duplicated from leaf 1.
    #[bits(11)]
    pub reserved0: u16,

    /// Bit 11: `SYSCALL`/`SYSRET` in 64-bit mode.
    pub syscall: bool,

    /// Bits 12–19: Reserved.
    #[bits(8)]
    pub reserved1: u8,

    /// Bit 20, NX: Execute-disable bit available.
    pub nx: bool,

    /// Bits 21–25: Reserved.
    #[bits(5)]
    pub reserved2: u8,

    /// Bit 26, Page1GB: 1 GiB leaves in the PDPT.
    pub page_1gb: bool,

    /// Bit 27: `RDTSCP`.
    pub rdtscp: bool,

    /// Bit 28: Reserved.
    pub reserved3: bool,

    /// Bit 29, LM: Long mode.
    pub long_mode: bool,

    /// Bits 30–31: Reserved.
    #[bits(2)]
    pub reserved4: u8,
}

/// `EAX` of leaf `0x8000_0008`.
#[bitfield(u32, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct AddressSizes {
    /// Bits 0–7: MAXPHYADDR.
    pub physical_bits: u8,

    /// Bits 8–15: Linear address width.
    pub linear_bits: u8,

    /// Bits 16–31: Reserved.
    pub reserved: u16,
}

impl AddressSizes {
    /// Assumed when the leaf is missing.
    pub const FALLBACK_PHYSICAL_BITS: u8 = 36;
}

/// Feature bits of leaf `0x8000_0001`, or `None` if the leaf is missing.
#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
#[must_use]
pub fn extended_features() -> Option<ExtendedFeatures> {
    use core::arch::x86_64::__cpuid;
    // SAFETY: CPUID exists on every x86-64 processor.
    let max = unsafe { __cpuid(EXTENDED_MAX_LEAF) }.eax;
    if max < EXTENDED_FEATURES_LEAF {
        return None;
    }
    // SAFETY: as above; the leaf exists.
    Some(ExtendedFeatures::from_bits(unsafe { __cpuid(EXTENDED_FEATURES_LEAF) }.edx))
}

/// Address sizes of leaf `0x8000_0008`, or `None` if the leaf is missing.
#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
#[must_use]
pub fn address_sizes() -> Option<AddressSizes> {
    use core::arch::x86_64::__cpuid;
    // SAFETY: CPUID exists on every x86-64 processor.
    let max = unsafe { __cpuid(EXTENDED_MAX_LEAF) }.eax;
    if max < ADDRESS_SIZES_LEAF {
        return None;
    }
    // SAFETY: as above; the leaf exists.
    Some(AddressSizes::from_bits(unsafe { __cpuid(ADDRESS_SIZES_LEAF) }.eax))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gigabyte_pages_are_bit_26() {
        assert!(ExtendedFeatures::from_bits(1 << 26).page_1gb());
        assert!(!ExtendedFeatures::from_bits(!(1 << 26)).page_1gb());
    }

    #[test]
    fn typical_long_mode_processor() {
        // SYSCALL, NX, Page1GB, RDTSCP, LM.
        let features = ExtendedFeatures::from_bits(0x2C10_0800);
        assert!(features.syscall());
        assert!(features.nx());
        assert!(features.page_1gb());
        assert!(features.rdtscp());
        assert!(features.long_mode());
    }

    #[test]
    fn address_sizes_split_the_low_bytes() {
        let sizes = AddressSizes::from_bits(0x0000_3027);
        assert_eq!(sizes.physical_bits(), 39);
        assert_eq!(sizes.linear_bits(), 48);
    }
}
