#![allow(unsafe_code)]

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull, null_mut};
use crate::hooks::pool_services;
use uefi::boot::MemoryType;

/// Boot-services pool memory behind Rust's global allocator.
///
/// The driver's own bookkeeping (page table arena, allocation records,
/// quarantine) lives here, never in the special pool itself. It goes to the
/// firmware's original `AllocatePool`, so it keeps working while the
/// boot-services table points at the special pool.
///
/// # Notes
/// - Valid only while boot services are active.
/// - Over-allocates to satisfy alignment and stores the original pointer just
///   before the returned block for deallocation.
pub struct UefiBootAllocator;

#[cfg(not(test))]
#[global_allocator]
static GLOBAL_ALLOC: UefiBootAllocator = UefiBootAllocator;

unsafe impl GlobalAlloc for UefiBootAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align().max(size_of::<usize>());
        let size = layout.size().max(1);
        let Some(total) = size
            .checked_add(align)
            .and_then(|v| v.checked_add(size_of::<usize>()))
        else {
            return null_mut();
        };

        let Some(Ok(raw)) =
            pool_services().map(|pool| pool.allocate(MemoryType::BOOT_SERVICES_DATA, total))
        else {
            return null_mut();
        };

        let raw_ptr = raw.as_ptr();
        let offset = aligned_offset(raw_ptr as usize, align);
        // SAFETY: `offset + size` stays inside the `total` bytes just allocated.
        unsafe {
            let aligned = raw_ptr.add(offset);
            ptr::write_unaligned(aligned.cast::<usize>().sub(1), raw_ptr as usize);
            aligned
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }

        // SAFETY: `alloc` stored the pool pointer right before `ptr`.
        let original = unsafe { ptr::read_unaligned(ptr.cast::<usize>().sub(1)) } as *mut u8;
        if let (Some(original), Some(pool)) = (NonNull::new(original), pool_services()) {
            // SAFETY: `original` was returned by the same pool services.
            let _ = unsafe { pool.free(original) };
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }
}

/// Distance from `raw` to the first `align`-aligned address that leaves
/// room for the header word.
const fn aligned_offset(raw: usize, align: usize) -> usize {
    let first = raw + size_of::<usize>();
    let aligned = (first + (align - 1)) & !(align - 1);
    aligned - raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_always_fits_before_the_block() {
        for raw in [0x1000, 0x1008, 0x1010, 0x1ff8] {
            for align in [8, 16, 64, 4096] {
                let offset = aligned_offset(raw, align);
                assert!(offset >= size_of::<usize>());
                assert!(offset < align + size_of::<usize>());
                assert_eq!((raw + offset) % align, 0);
            }
        }
    }
}
