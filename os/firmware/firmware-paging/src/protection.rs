use crate::editor::{PageTableEditor, Translation};
use crate::error::PagingError;
use crate::frames::FrameSource;
use crate::mapper::PhysMapper;
use crate::tlb::TranslationCache;
use firmware_addresses::{LeafSize, PhysicalAddress, PhysicalRange, VirtualAddress, VirtualRange};

/// The page-protection entry points the special pool and the stack guard use.
///
/// Implemented by [`PageTableEditor`] for flat 4-level paging and by
/// [`Unsupported`](crate::Unsupported) everywhere else, so callers never
/// need to know which one they got.
pub trait PageProtection {
    /// Mark the 4 KiB page containing `address` not present.
    ///
    /// # Errors
    /// See [`PageTableEditor::disable_page`].
    fn disable_page(&self, address: VirtualAddress) -> Result<(), PagingError>;

    /// Restore the page exactly as it was before it was disabled.
    ///
    /// # Errors
    /// See [`PageTableEditor::enable_page`].
    fn enable_page(&self, address: VirtualAddress) -> Result<(), PagingError>;

    /// Demote the large leaf covering `address` one level.
    ///
    /// # Errors
    /// See [`PageTableEditor::split_large_page`].
    fn split_large_page(
        &self,
        address: VirtualAddress,
        reserved: PhysicalRange,
    ) -> Result<LeafSize, PagingError>;

    /// Split every large leaf intersecting `range` down to 4 KiB.
    ///
    /// # Errors
    /// See [`PageTableEditor::ensure_fine_grained`].
    fn ensure_fine_grained(
        &self,
        range: VirtualRange,
        reserved: PhysicalRange,
    ) -> Result<usize, PagingError>;

    /// Replace the hierarchy with an identity map; returns the new root.
    ///
    /// # Errors
    /// See [`PageTableEditor::build_identity_map`].
    fn build_identity_map(&self, stack: VirtualRange) -> Result<PhysicalAddress, PagingError>;

    /// Invalidate every cached translation on all execution contexts.
    ///
    /// # Errors
    /// [`PagingError::Unsupported`] without flat paging.
    fn flush_translation_cache(&self) -> Result<(), PagingError>;

    /// Resolve `address` through the hierarchy.
    ///
    /// # Errors
    /// See [`PageTableEditor::translate`].
    fn translate(&self, address: VirtualAddress) -> Result<Translation, PagingError>;

    /// Whether the CPU currently translates through these tables.
    fn owns_active_root(&self) -> bool;

    /// Whether any of the above can succeed at all.
    fn is_supported(&self) -> bool {
        true
    }
}

impl<T: PageProtection + ?Sized> PageProtection for &T {
    fn disable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        (**self).disable_page(address)
    }

    fn enable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        (**self).enable_page(address)
    }

    fn split_large_page(
        &self,
        address: VirtualAddress,
        reserved: PhysicalRange,
    ) -> Result<LeafSize, PagingError> {
        (**self).split_large_page(address, reserved)
    }

    fn ensure_fine_grained(
        &self,
        range: VirtualRange,
        reserved: PhysicalRange,
    ) -> Result<usize, PagingError> {
        (**self).ensure_fine_grained(range, reserved)
    }

    fn build_identity_map(&self, stack: VirtualRange) -> Result<PhysicalAddress, PagingError> {
        (**self).build_identity_map(stack)
    }

    fn flush_translation_cache(&self) -> Result<(), PagingError> {
        (**self).flush_translation_cache()
    }

    fn translate(&self, address: VirtualAddress) -> Result<Translation, PagingError> {
        (**self).translate(address)
    }

    fn owns_active_root(&self) -> bool {
        (**self).owns_active_root()
    }

    fn is_supported(&self) -> bool {
        (**self).is_supported()
    }
}

impl<M: PhysMapper, F: FrameSource, C: TranslationCache> PageProtection for PageTableEditor<M, F, C> {
    fn disable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        Self::disable_page(self, address)
    }

    fn enable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        Self::enable_page(self, address)
    }

    fn split_large_page(
        &self,
        address: VirtualAddress,
        reserved: PhysicalRange,
    ) -> Result<LeafSize, PagingError> {
        Self::split_large_page(self, address, reserved)
    }

    fn ensure_fine_grained(
        &self,
        range: VirtualRange,
        reserved: PhysicalRange,
    ) -> Result<usize, PagingError> {
        Self::ensure_fine_grained(self, range, reserved)
    }

    fn build_identity_map(&self, stack: VirtualRange) -> Result<PhysicalAddress, PagingError> {
        Self::build_identity_map(self, stack)
    }

    fn flush_translation_cache(&self) -> Result<(), PagingError> {
        Self::flush_translation_cache(self);
        Ok(())
    }

    fn translate(&self, address: VirtualAddress) -> Result<Translation, PagingError> {
        Self::translate(self, address)
    }

    fn owns_active_root(&self) -> bool {
        Self::owns_active_root(self)
    }
}
