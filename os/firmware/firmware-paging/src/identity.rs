//! Identity map configuration.

/// Widest physical address 4-level paging can identity map.
pub const MAX_PHYSICAL_ADDRESS_BITS: u8 = 48;

/// Narrowest map still made of whole 2 MiB leaves.
pub const MIN_PHYSICAL_ADDRESS_BITS: u8 = 21;

/// How [`build_identity_map`](crate::PageTableEditor::build_identity_map)
/// lays out a fresh hierarchy.
///
/// ```rust
/// # use firmware_paging::IdentityMapConfig;
/// let cfg = IdentityMapConfig::new()
///     .with_physical_address_bits(39)
///     .with_use_1g_pages(true);
/// assert_eq!(cfg.addressable_end(), 1 << 39);
/// assert_eq!(IdentityMapConfig::new().with_physical_address_bits(60).physical_address_bits(), 48);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IdentityMapConfig {
    physical_address_bits: u8,
    use_1g_pages: bool,
    nx_for_stack: bool,
}

impl IdentityMapConfig {
    /// 36 address bits, 2 MiB leaves, executable stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            physical_address_bits: 36,
            use_1g_pages: false,
            nx_for_stack: false,
        }
    }

    /// Clamped to what 4-level paging with 2 MiB leaves can express.
    #[must_use]
    pub const fn with_physical_address_bits(mut self, bits: u8) -> Self {
        self.physical_address_bits = if bits > MAX_PHYSICAL_ADDRESS_BITS {
            MAX_PHYSICAL_ADDRESS_BITS
        } else if bits < MIN_PHYSICAL_ADDRESS_BITS {
            MIN_PHYSICAL_ADDRESS_BITS
        } else {
            bits
        };
        self
    }

    /// Map with 1 GiB leaves (needs `PDPE1GB` support).
    #[must_use]
    pub const fn with_use_1g_pages(mut self, enabled: bool) -> Self {
        self.use_1g_pages = enabled;
        self
    }

    /// Mark the 4 KiB stack leaves no-execute (needs `EFER.NXE`).
    #[must_use]
    pub const fn with_nx_for_stack(mut self, enabled: bool) -> Self {
        self.nx_for_stack = enabled;
        self
    }

    #[must_use]
    pub const fn physical_address_bits(&self) -> u8 {
        self.physical_address_bits
    }

    #[must_use]
    pub const fn use_1g_pages(&self) -> bool {
        self.use_1g_pages
    }

    #[must_use]
    pub const fn nx_for_stack(&self) -> bool {
        self.nx_for_stack
    }

    /// First address past the identity mapped physical space.
    #[must_use]
    pub const fn addressable_end(&self) -> u64 {
        1 << self.physical_address_bits
    }
}

impl Default for IdentityMapConfig {
    fn default() -> Self {
        Self::new()
    }
}
