use crate::editor::Translation;
use crate::error::PagingError;
use crate::protection::PageProtection;
use firmware_addresses::{LeafSize, PhysicalAddress, PhysicalRange, VirtualAddress, VirtualRange};

/// Stand-in for processors without flat 4-level paging.
///
/// Every entry point fails with [`PagingError::Unsupported`] and touches
/// nothing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Unsupported;

impl PageProtection for Unsupported {
    fn disable_page(&self, _address: VirtualAddress) -> Result<(), PagingError> {
        Err(PagingError::Unsupported)
    }

    fn enable_page(&self, _address: VirtualAddress) -> Result<(), PagingError> {
        Err(PagingError::Unsupported)
    }

    fn split_large_page(
        &self,
        _address: VirtualAddress,
        _reserved: PhysicalRange,
    ) -> Result<LeafSize, PagingError> {
        Err(PagingError::Unsupported)
    }

    fn ensure_fine_grained(
        &self,
        _range: VirtualRange,
        _reserved: PhysicalRange,
    ) -> Result<usize, PagingError> {
        Err(PagingError::Unsupported)
    }

    fn build_identity_map(&self, _stack: VirtualRange) -> Result<PhysicalAddress, PagingError> {
        Err(PagingError::Unsupported)
    }

    fn flush_translation_cache(&self) -> Result<(), PagingError> {
        Err(PagingError::Unsupported)
    }

    fn translate(&self, _address: VirtualAddress) -> Result<Translation, PagingError> {
        Err(PagingError::Unsupported)
    }

    fn owns_active_root(&self) -> bool {
        false
    }

    fn is_supported(&self) -> bool {
        false
    }
}
