//! Local translation-cache invalidation.

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::{Cr3, LoadRegisterUnsafe, StoreRegisterUnsafe};
use firmware_addresses::VirtualAddress;

/// Invalidate the local TLB entry for the page containing `va`.
///
/// # Safety
/// Requires CPL 0.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

/// Drop every non-global translation on this CPU by reloading CR3.
///
/// # Safety
/// Requires CPL 0.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn flush_local() {
    unsafe {
        let cr3 = Cr3::load_unsafe();
        cr3.store_unsafe();
    }
}

/// Fallbacks so that host builds on other architectures still link.
#[cfg(not(all(feature = "asm", target_arch = "x86_64")))]
#[allow(clippy::missing_safety_doc)]
pub unsafe fn invlpg(_va: VirtualAddress) {}

#[cfg(not(all(feature = "asm", target_arch = "x86_64")))]
#[allow(clippy::missing_safety_doc)]
pub unsafe fn flush_local() {}
