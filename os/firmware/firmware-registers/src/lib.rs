//! # Typed `x86_64` Control Registers
//!
//! The subset of control registers the special pool needs: CR0/CR4/EFER to
//! decide whether flat 4-level paging is active, CR3 to find and install the
//! PML4, [`cpuid`] for 1 GiB leaves and MAXPHYADDR, and [`tlb`] for
//! translation-cache invalidation.
//!
//! Register access is only compiled with the `asm` feature on `x86_64`;
//! the bitfield models themselves are usable anywhere (host tests included).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr0;
pub mod cr3;
pub mod cr4;
pub mod cpuid;
pub mod efer;
pub mod tlb;

pub use cr0::Cr0;
pub use cr3::Cr3;
pub use cpuid::{AddressSizes, ExtendedFeatures};
pub use cr4::Cr4;
pub use efer::Efer;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The register access is privileged and requires CPL 0.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the register-specific requirements; writing a
    /// control register changes how every subsequent memory access behaves.
    unsafe fn store_unsafe(self);
}
