use crate::table::PageTable;
use firmware_addresses::{PhysicalPage, Size4K};

/// Turns the physical frame of a table into something the editor can touch.
///
/// Firmware runs identity mapped, so the usual implementation is
/// [`IdentityMapper`]; host tests back the frames with ordinary memory.
pub trait PhysMapper {
    /// The table stored in `frame`, or `None` if the frame cannot be reached.
    ///
    /// # Safety
    /// `frame` must hold a page table (or memory about to become one) that
    /// stays valid for `'a` and is accessed only through atomics.
    unsafe fn table<'a>(&self, frame: PhysicalPage<Size4K>) -> Option<&'a PageTable>;
}

impl<T: PhysMapper + ?Sized> PhysMapper for &T {
    unsafe fn table<'a>(&self, frame: PhysicalPage<Size4K>) -> Option<&'a PageTable> {
        unsafe { (**self).table(frame) }
    }
}

/// Tables live at their physical address (virtual == physical).
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    unsafe fn table<'a>(&self, frame: PhysicalPage<Size4K>) -> Option<&'a PageTable> {
        let ptr = frame.identity().base().as_mut_ptr::<PageTable>();
        // SAFETY: the caller guarantees an identity mapped table at `frame`.
        unsafe { ptr.as_ref() }
    }
}
