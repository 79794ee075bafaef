use crate::memory_type::MemoryType;
use firmware_addresses::PhysicalAddress;

/// Source of the page runs that back guarded allocations.
///
/// In firmware this is the boot-services page allocator; the special pool
/// never writes to the pages itself.
pub trait BulkAllocator {
    /// `count` contiguous 4 KiB pages of `memory_type`, or `None` when
    /// exhausted.
    ///
    /// The pages carry the caller's type so the firmware memory map stays
    /// accurate for guarded buffers too.
    fn allocate_pages(&mut self, memory_type: MemoryType, count: u64) -> Option<PhysicalAddress>;

    /// Return a run obtained from [`allocate_pages`](Self::allocate_pages).
    fn free_pages(&mut self, base: PhysicalAddress, count: u64);
}

impl<T: BulkAllocator + ?Sized> BulkAllocator for &mut T {
    fn allocate_pages(&mut self, memory_type: MemoryType, count: u64) -> Option<PhysicalAddress> {
        (**self).allocate_pages(memory_type, count)
    }

    fn free_pages(&mut self, base: PhysicalAddress, count: u64) {
        (**self).free_pages(base, count);
    }
}
