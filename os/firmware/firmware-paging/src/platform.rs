//! Capability detection and the dispatch between real and unsupported paging.

use crate::editor::Translation;
use crate::error::PagingError;
use crate::protection::PageProtection;
use crate::unsupported::Unsupported;
use core::fmt;
use firmware_addresses::{LeafSize, PhysicalAddress, PhysicalRange, VirtualAddress, VirtualRange};
use firmware_registers::{Cr0, Cr4, Efer};
use log::{info, warn};

/// Why the editor cannot run on this processor state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MissingFeature {
    /// Not an x86-64 target at all.
    Architecture,
    /// `CR0.PG` is clear.
    Paging,
    /// `CR4.PAE` is clear.
    PhysicalAddressExtension,
    /// `EFER.LMA` is clear (legacy 32-bit paging).
    LongMode,
    /// `CR4.LA57` is set; 5-level hierarchies are out of scope.
    FiveLevelPaging,
}

impl fmt::Display for MissingFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Architecture => "not an x86-64 processor",
            Self::Paging => "paging disabled (CR0.PG=0)",
            Self::PhysicalAddressExtension => "PAE disabled (CR4.PAE=0)",
            Self::LongMode => "long mode inactive (EFER.LMA=0)",
            Self::FiveLevelPaging => "5-level paging active (CR4.LA57=1)",
        })
    }
}

/// What the processor offers for guard pages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PagingCapability {
    /// Flat 4-level paging; `no_execute` reports `EFER.NXE`.
    FourLevel { no_execute: bool },
    Unavailable(MissingFeature),
}

impl PagingCapability {
    /// Classify a snapshot of the control registers.
    #[must_use]
    pub const fn from_registers(cr0: Cr0, cr4: Cr4, efer: Efer) -> Self {
        if !cr0.pg() {
            Self::Unavailable(MissingFeature::Paging)
        } else if !cr4.pae() {
            Self::Unavailable(MissingFeature::PhysicalAddressExtension)
        } else if !efer.lma() {
            Self::Unavailable(MissingFeature::LongMode)
        } else if cr4.la57() {
            Self::Unavailable(MissingFeature::FiveLevelPaging)
        } else {
            Self::FourLevel {
                no_execute: efer.nxe(),
            }
        }
    }

    /// Read the control registers of the current processor.
    ///
    /// # Safety
    /// Requires CPL 0.
    #[cfg(target_arch = "x86_64")]
    #[must_use]
    pub unsafe fn detect() -> Self {
        use firmware_registers::LoadRegisterUnsafe;
        unsafe { Self::from_registers(Cr0::load_unsafe(), Cr4::load_unsafe(), Efer::load_unsafe()) }
    }

    /// # Safety
    /// Always safe; kept `unsafe` to match the x86-64 signature.
    #[cfg(not(target_arch = "x86_64"))]
    #[must_use]
    pub unsafe fn detect() -> Self {
        Self::Unavailable(MissingFeature::Architecture)
    }

    #[must_use]
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::FourLevel { .. })
    }
}

/// Page protection chosen once at initialization from a [`PagingCapability`].
#[derive(Debug)]
pub enum Paging<E> {
    FourLevel(E),
    Unsupported(Unsupported),
}

impl<E: PageProtection> Paging<E> {
    /// Build the editor with `build` if `capability` allows it.
    ///
    /// # Errors
    /// Whatever `build` fails with; an unsupported platform is not an error.
    pub fn select<Err>(
        capability: PagingCapability,
        build: impl FnOnce() -> Result<E, Err>,
    ) -> Result<Self, Err> {
        match capability {
            PagingCapability::FourLevel { no_execute } => {
                info!("Flat 4-level paging detected (NX: {no_execute})");
                build().map(Self::FourLevel)
            }
            PagingCapability::Unavailable(missing) => {
                warn!("Guard pages unavailable: {missing}");
                Ok(Self::Unsupported(Unsupported))
            }
        }
    }

    fn protection(&self) -> &dyn PageProtection {
        match self {
            Self::FourLevel(editor) => editor,
            Self::Unsupported(unsupported) => unsupported,
        }
    }

    /// The editor, if paging is supported.
    pub const fn editor(&self) -> Option<&E> {
        match self {
            Self::FourLevel(editor) => Some(editor),
            Self::Unsupported(_) => None,
        }
    }
}

impl<E: PageProtection> PageProtection for Paging<E> {
    fn disable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        self.protection().disable_page(address)
    }

    fn enable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        self.protection().enable_page(address)
    }

    fn split_large_page(
        &self,
        address: VirtualAddress,
        reserved: PhysicalRange,
    ) -> Result<LeafSize, PagingError> {
        self.protection().split_large_page(address, reserved)
    }

    fn ensure_fine_grained(
        &self,
        range: VirtualRange,
        reserved: PhysicalRange,
    ) -> Result<usize, PagingError> {
        self.protection().ensure_fine_grained(range, reserved)
    }

    fn build_identity_map(&self, stack: VirtualRange) -> Result<PhysicalAddress, PagingError> {
        self.protection().build_identity_map(stack)
    }

    fn flush_translation_cache(&self) -> Result<(), PagingError> {
        self.protection().flush_translation_cache()
    }

    fn translate(&self, address: VirtualAddress) -> Result<Translation, PagingError> {
        self.protection().translate(address)
    }

    fn owns_active_root(&self) -> bool {
        self.protection().owns_active_root()
    }

    fn is_supported(&self) -> bool {
        self.protection().is_supported()
    }
}
