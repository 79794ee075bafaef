use core::fmt;

/// A firmware memory type, numbered as in the UEFI memory map.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryType(pub u32);

impl MemoryType {
    pub const RESERVED: Self = Self(0);
    pub const LOADER_CODE: Self = Self(1);
    pub const LOADER_DATA: Self = Self(2);
    pub const BOOT_SERVICES_CODE: Self = Self(3);
    pub const BOOT_SERVICES_DATA: Self = Self(4);
    pub const RUNTIME_SERVICES_CODE: Self = Self(5);
    pub const RUNTIME_SERVICES_DATA: Self = Self(6);
    pub const CONVENTIONAL: Self = Self(7);
    pub const UNUSABLE: Self = Self(8);
    pub const ACPI_RECLAIM: Self = Self(9);
    pub const ACPI_NON_VOLATILE: Self = Self(10);
    pub const MMIO: Self = Self(11);
    pub const MMIO_PORT_SPACE: Self = Self(12);
    pub const PAL_CODE: Self = Self(13);
    pub const PERSISTENT_MEMORY: Self = Self(14);

    const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "Reserved",
            1 => "LoaderCode",
            2 => "LoaderData",
            3 => "BootServicesCode",
            4 => "BootServicesData",
            5 => "RuntimeServicesCode",
            6 => "RuntimeServicesData",
            7 => "Conventional",
            8 => "Unusable",
            9 => "AcpiReclaim",
            10 => "AcpiNonVolatile",
            11 => "Mmio",
            12 => "MmioPortSpace",
            13 => "PalCode",
            14 => "PersistentMemory",
            _ => return None,
        })
    }
}

impl fmt::Debug for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "MemoryType(0x{:08X})", self.0),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Set of memory types served by the special pool, one bit per type number.
///
/// Types numbered 32 and above (OEM and OS ranges) can never be selected.
///
/// ```rust
/// # use firmware_special_pool::{MemoryType, MemoryTypeMask};
/// let mask = MemoryTypeMask::empty()
///     .with(MemoryType::BOOT_SERVICES_DATA)
///     .with(MemoryType::LOADER_DATA);
/// assert_eq!(mask.bits(), 0x14);
/// assert!(mask.contains(MemoryType::LOADER_DATA));
/// assert!(!mask.contains(MemoryType(0x7000_0000)));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct MemoryTypeMask(u32);

impl MemoryTypeMask {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn with(self, memory_type: MemoryType) -> Self {
        match 1u32.checked_shl(memory_type.0) {
            Some(bit) => Self(self.0 | bit),
            None => self,
        }
    }

    #[must_use]
    pub const fn contains(self, memory_type: MemoryType) -> bool {
        match 1u32.checked_shl(memory_type.0) {
            Some(bit) => self.0 & bit != 0,
            None => false,
        }
    }
}

impl fmt::Debug for MemoryTypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryTypeMask(0x{:08X})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_types_are_never_selected() {
        let all = MemoryTypeMask::from_bits(u32::MAX);
        assert!(all.contains(MemoryType(31)));
        assert!(!all.contains(MemoryType(32)));
        assert_eq!(MemoryTypeMask::empty().with(MemoryType(40)), MemoryTypeMask::empty());
    }

    #[test]
    fn names() {
        assert_eq!(format!("{}", MemoryType::BOOT_SERVICES_DATA), "BootServicesData");
        assert_eq!(format!("{:?}", MemoryType(0x8000_0001)), "MemoryType(0x80000001)");
    }
}
