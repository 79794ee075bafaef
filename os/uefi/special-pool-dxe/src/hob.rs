//! # Hand-off blocks
//!
//! The PEI phase describes what it set up for DXE in a list of hand-off
//! blocks (HOBs), published as a configuration table. The only one the
//! driver needs is the memory-allocation HOB naming the boot stack: it gives
//! the real base and size of the stack DXE runs on, so the guard page lands
//! directly below it and nowhere else.
//!
//! ```text
//! +------+--------+----------+   +------+--------+------------------------+
//! | type | length | reserved |   | 0x02 | length | name | base | len | ty |  ...  0xFFFF
//! +------+--------+----------+   +------+--------+------------------------+
//!   u16     u16       u32          memory allocation
//! ```

#![allow(unsafe_code)]

use core::ptr;
use firmware_addresses::{PhysicalAddress, VirtualAddress, VirtualRange};
use uefi::{Guid, guid};

/// Configuration table holding the HOB list.
pub const HOB_LIST_GUID: Guid = guid!("7739f24c-93d7-11d4-9a3a-0090273fc14d");

/// Name of the memory-allocation HOB describing the boot stack.
pub const STACK_ALLOCATION_GUID: Guid = guid!("4ed4bf27-4092-42e9-807d-527b1d00c9bd");

const MEMORY_ALLOCATION: u16 = 0x0002;
const END_OF_HOB_LIST: u16 = 0xFFFF;

#[repr(C)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
struct HobHeader {
    hob_type: u16,
    length: u16,
    reserved: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
struct MemoryAllocationHob {
    header: HobHeader,
    name: [u8; 16],
    base: u64,
    length: u64,
    memory_type: u32,
    reserved: [u8; 4],
}

/// One memory-allocation HOB.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryAllocation {
    pub name: Guid,
    pub base: PhysicalAddress,
    pub length: u64,
    pub memory_type: u32,
}

impl MemoryAllocation {
    /// The allocated bytes, identity mapped; `None` if the range wraps.
    #[must_use]
    pub const fn range(&self) -> Option<VirtualRange> {
        VirtualRange::new(VirtualAddress::new(self.base.as_u64()), self.length)
    }
}

/// Memory-allocation HOBs of a HOB list, in list order.
///
/// Stops at the end-of-list marker or at the first malformed header.
pub struct MemoryAllocations {
    cursor: *const u8,
}

impl MemoryAllocations {
    /// # Safety
    /// `list` must point to a HOB list that stays readable while iterating.
    #[must_use]
    pub const unsafe fn new(list: *const u8) -> Self {
        Self { cursor: list }
    }
}

impl Iterator for MemoryAllocations {
    type Item = MemoryAllocation;

    fn next(&mut self) -> Option<MemoryAllocation> {
        loop {
            if self.cursor.is_null() {
                return None;
            }
            // SAFETY: the cursor points at a HOB header of the list.
            let header = unsafe { ptr::read_unaligned(self.cursor.cast::<HobHeader>()) };
            let length = usize::from(header.length);
            if header.hob_type == END_OF_HOB_LIST || length < size_of::<HobHeader>() {
                self.cursor = ptr::null();
                return None;
            }
            let current = self.cursor;
            // SAFETY: `length` bytes belong to this HOB.
            self.cursor = unsafe { current.add(length) };

            if header.hob_type != MEMORY_ALLOCATION || length < size_of::<MemoryAllocationHob>() {
                continue;
            }
            // SAFETY: the HOB is long enough for an allocation descriptor.
            let hob = unsafe { ptr::read_unaligned(current.cast::<MemoryAllocationHob>()) };
            return Some(MemoryAllocation {
                name: Guid::from_bytes(hob.name),
                base: PhysicalAddress::new(hob.base),
                length: hob.length,
                memory_type: hob.memory_type,
            });
        }
    }
}

/// The boot stack named among `allocations`.
#[must_use]
pub fn boot_stack(mut allocations: impl Iterator<Item = MemoryAllocation>) -> Option<VirtualRange> {
    allocations
        .find(|allocation| allocation.name == STACK_ALLOCATION_GUID)
        .and_then(|allocation| allocation.range())
        .filter(|range| !range.is_empty())
}

/// The boot stack as the firmware's HOB list describes it.
///
/// `None` if there is no HOB list or it names no stack.
#[must_use]
pub fn firmware_boot_stack() -> Option<VirtualRange> {
    let list = uefi::system::with_config_table(|tables| {
        tables
            .iter()
            .find(|entry| entry.guid == HOB_LIST_GUID)
            .map(|entry| entry.address.cast::<u8>())
    })?;
    // SAFETY: the firmware keeps its HOB list resident for all of DXE.
    boot_stack(unsafe { MemoryAllocations::new(list) })
}
