//! # Special Pool DXE Driver
//!
//! Brings the guard-page special pool up inside UEFI boot services.
//!
//! ```text
//! efi_main
//!   ├─ UefiLogger           console logging while boot services run
//!   ├─ PagingCapability     flat 4-level paging? otherwise pass-through
//!   ├─ PageTableEditor      private identity map (or the firmware's tables)
//!   ├─ SpecialPool::prepare fine-grained range, page 0 trapped
//!   ├─ install_stack_guard  guard page below the stack named by the HOB list
//!   ├─ IstStackVector       #DF / #SS / #PF on their own stacks
//!   └─ hooks::install       gBS->AllocatePool / FreePool through SpecialPoolDxe
//! ```
//!
//! Monitored memory types are served from the special pool: every buffer
//! gets its own pages with not-present guard pages around them, so an
//! overrun faults on the first byte outside the buffer. Everything else is
//! passed to the firmware's own pool unchanged.
//!
//! The image is linked as a boot-services driver (see `build.rs`) and stays
//! resident after `efi_main` returns. Its own bookkeeping is allocated from
//! the firmware's pool through [`memory::UefiBootAllocator`].

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![allow(unsafe_code)]

extern crate alloc;

mod boot_alloc;
mod constructor;
mod dispatch;
mod fault_vector;
mod hob;
mod hooks;
mod logger;
mod memory;

use crate::constructor::{DxeConfig, initialize};
use crate::dispatch::SpecialPoolDxe;
use crate::logger::UefiLogger;
use firmware_addresses::VirtualAddress;
use log::{LevelFilter, error, info};
use uefi::boot::MemoryType;
use uefi::{Status, entry};

#[entry]
fn efi_main() -> Status {
    if UefiLogger::new(LevelFilter::Info).init().is_err() {
        return Status::ABORTED;
    }
    info!("Special pool driver starting");

    let dxe = match initialize(DxeConfig::default()) {
        Ok(dxe) => dxe,
        Err(e) => {
            error!("Special pool initialization failed: {e}");
            return Status::ABORTED;
        }
    };

    if let Err(status) = self_test(&dxe) {
        error!("Special pool self-test failed: {status:?}");
        return status;
    }

    // The pool and its tables stay in use after this image returns.
    let driver = match hooks::install(dxe) {
        Ok(driver) => driver,
        Err(e) => {
            error!("Boot-services pool not rerouted: {:?}", e.status());
            return e.status();
        }
    };

    let stats = driver.pool().stats();
    info!(
        "Special pool driver ready: {} live, stack guard {:?}, routing {:?}",
        stats.live,
        driver.stack_guard().map(|guard| guard.page()),
        driver.fault_routing()
    );
    Status::SUCCESS
}

/// Round-trip one monitored allocation, touching its first and last byte.
fn self_test(dxe: &SpecialPoolDxe) -> Result<(), Status> {
    const SIZE: usize = 24;
    let buffer = dxe
        .allocate_pool(MemoryType::BOOT_SERVICES_DATA, SIZE)
        .map_err(|e| e.status())?;
    // SAFETY: `buffer` holds `SIZE` writable bytes.
    unsafe {
        buffer.as_ptr().write_volatile(0xA5);
        buffer.as_ptr().add(SIZE - 1).write_volatile(0x5A);
    }
    let guarded = dxe.pool().owns(VirtualAddress::from_nonnull(buffer));
    info!("Self-test buffer at {:p} (guarded: {guarded})", buffer.as_ptr());
    // SAFETY: allocated above and no longer used.
    unsafe { dxe.free_pool(buffer) }.map_err(|e| e.status())
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("{info}");
    loop {
        core::hint::spin_loop();
    }
}
