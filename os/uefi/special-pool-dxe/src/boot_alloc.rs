//! Boot-services page allocations for the pool's data pages and for new
//! page tables.

#![allow(unsafe_code)]

use core::ptr::NonNull;
use firmware_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use firmware_paging::FrameSource;
use firmware_special_pool::{BulkAllocator, MemoryType as PoolMemoryType};
use log::warn;
use uefi::boot::{self, AllocateType, MemoryType};

fn allocate(memory_type: MemoryType, count: u64) -> Option<PhysicalAddress> {
    let count = usize::try_from(count).ok()?;
    let base = boot::allocate_pages(AllocateType::AnyPages, memory_type, count).ok()?;
    Some(PhysicalAddress::from_nonnull(base))
}

fn free(base: PhysicalAddress, count: u64) {
    let Ok(count) = usize::try_from(count) else {
        return;
    };
    let Some(pointer) = NonNull::new(base.identity().as_mut_ptr::<u8>()) else {
        return;
    };
    // SAFETY: callers only return runs obtained from `allocate` with the same count.
    if let Err(e) = unsafe { boot::free_pages(pointer, count) } {
        warn!("Failed to free {count} pages at {base}: {:?}", e.status());
    }
}

/// Backing pages for guarded allocations, typed like the pool request
/// they serve.
#[derive(Copy, Clone, Debug, Default)]
pub struct BootServicesPages;

impl BulkAllocator for BootServicesPages {
    fn allocate_pages(&mut self, memory_type: PoolMemoryType, count: u64) -> Option<PhysicalAddress> {
        allocate(MemoryType(memory_type.0), count)
    }

    fn free_pages(&mut self, base: PhysicalAddress, count: u64) {
        free(base, count);
    }
}

/// One page at a time for the page table editor.
///
/// Tables are boot-services data by default and go away with the pool.
#[derive(Copy, Clone, Debug)]
pub struct BootServicesFrames {
    memory_type: MemoryType,
}

impl BootServicesFrames {
    #[must_use]
    pub const fn new(memory_type: MemoryType) -> Self {
        Self { memory_type }
    }
}

impl Default for BootServicesFrames {
    fn default() -> Self {
        Self::new(MemoryType::BOOT_SERVICES_DATA)
    }
}

impl FrameSource for BootServicesFrames {
    fn allocate_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        let base = allocate(self.memory_type, 1)?;
        PhysicalPage::from_aligned(base)
    }

    fn release_frame(&mut self, frame: PhysicalPage<Size4K>) {
        free(frame.base(), 1);
    }
}
