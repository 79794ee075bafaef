//! # `AllocatePool` / `FreePool` interposition
//!
//! After start-up the driver replaces the two pool entry points of the
//! boot-services table, so every image in the system allocates through
//! [`SpecialPoolDxe`]. Requests the special pool does not take are
//! forwarded to the entry points that were in the table before.
//!
//! The saved entries are also what the driver's own heap runs on; calling
//! [`uefi::boot::allocate_pool`] after patching would re-enter the hook.

#![allow(unsafe_code)]

use crate::dispatch::SpecialPoolDxe;
use core::ptr::{self, NonNull};
use firmware_sync::SyncOnceCell;
use log::info;
use uefi::boot::{self, MemoryType, Tpl};
use uefi::{Status, StatusExt};

type AllocatePoolFn = unsafe extern "efiapi" fn(MemoryType, usize, *mut *mut u8) -> Status;
type FreePoolFn = unsafe extern "efiapi" fn(*mut u8) -> Status;

/// Pool entry points of the boot-services table as the firmware set them.
#[derive(Copy, Clone)]
pub struct PoolServices {
    allocate: AllocatePoolFn,
    free: FreePoolFn,
}

impl PoolServices {
    #[must_use]
    pub const fn new(allocate: AllocatePoolFn, free: FreePoolFn) -> Self {
        Self { allocate, free }
    }

    /// The entries currently in the boot-services table.
    ///
    /// # Safety
    /// Boot services must be active.
    unsafe fn current() -> Option<Self> {
        let system_table = uefi::table::system_table_raw()?;
        // SAFETY: the system table and its boot-services table are valid
        // while boot services run.
        unsafe {
            let boot_services = system_table.as_ref().boot_services.as_ref()?;
            Some(Self::new(boot_services.allocate_pool, boot_services.free_pool))
        }
    }

    /// `AllocatePool` without the special pool.
    ///
    /// # Errors
    /// The status boot services returned.
    pub fn allocate(&self, memory_type: MemoryType, size: usize) -> uefi::Result<NonNull<u8>> {
        let mut buffer = ptr::null_mut();
        // SAFETY: `buffer` is a valid out-pointer.
        unsafe { (self.allocate)(memory_type, size, &raw mut buffer) }.to_result()?;
        NonNull::new(buffer).ok_or_else(|| Status::OUT_OF_RESOURCES.into())
    }

    /// `FreePool` without the special pool.
    ///
    /// # Safety
    /// `buffer` must come from [`allocate`](Self::allocate) or from the
    /// original `AllocatePool`, and must not be used afterwards.
    ///
    /// # Errors
    /// The status boot services returned.
    pub unsafe fn free(&self, buffer: NonNull<u8>) -> uefi::Result {
        // SAFETY: forwarded from the caller.
        unsafe { (self.free)(buffer.as_ptr()) }.to_result()
    }
}

impl core::fmt::Debug for PoolServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolServices")
            .field("allocate", &(self.allocate as *const ()))
            .field("free", &(self.free as *const ()))
            .finish()
    }
}

static ORIGINAL: SyncOnceCell<PoolServices> = SyncOnceCell::new();
static DRIVER: SyncOnceCell<SpecialPoolDxe> = SyncOnceCell::new();

/// The firmware's own pool entry points.
///
/// Saved on first use, which happens long before [`install`] patches the
/// table; `None` without boot services.
pub fn pool_services() -> Option<&'static PoolServices> {
    if let Some(saved) = ORIGINAL.get() {
        return Some(saved);
    }
    // SAFETY: only reached while nothing was patched yet.
    let current = unsafe { PoolServices::current() }?;
    match ORIGINAL.set(current) {
        Ok(saved) => Some(saved),
        Err(_) => ORIGINAL.get(),
    }
}

/// Publish `dxe` and route `gBS->AllocatePool` / `gBS->FreePool` to it.
///
/// # Errors
/// - [`Status::NOT_READY`] without boot services;
/// - [`Status::ALREADY_STARTED`] if a driver was installed before.
pub fn install(dxe: SpecialPoolDxe) -> uefi::Result<&'static SpecialPoolDxe> {
    let original = pool_services().ok_or(Status::NOT_READY)?;
    let system_table = uefi::table::system_table_raw().ok_or(Status::NOT_READY)?;
    let driver = DRIVER.set(dxe).map_err(|_| Status::ALREADY_STARTED)?;

    // SAFETY: the table is valid while boot services run; at HIGH_LEVEL
    // nothing else reads it until the checksum is back in place.
    unsafe {
        let _tpl = boot::raise_tpl(Tpl::HIGH_LEVEL);
        let boot_services = (*system_table.as_ptr()).boot_services;
        (*boot_services).allocate_pool = special_allocate_pool;
        (*boot_services).free_pool = special_free_pool;

        (*boot_services).header.crc = 0;
        let size = (*boot_services).header.size as usize;
        let mut crc = 0;
        ((*boot_services).calculate_crc32)(boot_services.cast_const().cast(), size, &raw mut crc).to_result()?;
        (*boot_services).header.crc = crc;
    }
    info!("Boot-services pool routed through the special pool (was {original:?})");
    Ok(driver)
}

unsafe extern "efiapi" fn special_allocate_pool(
    memory_type: MemoryType,
    size: usize,
    buffer: *mut *mut u8,
) -> Status {
    let driver = DRIVER.get();
    // SAFETY: AllocatePool is called at or below TPL_NOTIFY.
    let _tpl = driver.map(|_| unsafe { boot::raise_tpl(Tpl::NOTIFY) });
    // SAFETY: `buffer` is the caller's out-pointer.
    unsafe { allocate_with(driver, ORIGINAL.get(), memory_type, size, buffer) }
}

unsafe extern "efiapi" fn special_free_pool(buffer: *mut u8) -> Status {
    let driver = DRIVER.get();
    // SAFETY: FreePool is called at or below TPL_NOTIFY.
    let _tpl = driver.map(|_| unsafe { boot::raise_tpl(Tpl::NOTIFY) });
    // SAFETY: `buffer` is the caller's.
    unsafe { free_with(driver, ORIGINAL.get(), buffer) }
}

/// # Safety
/// `buffer` is null or writable.
unsafe fn allocate_with(
    driver: Option<&SpecialPoolDxe>,
    original: Option<&PoolServices>,
    memory_type: MemoryType,
    size: usize,
    buffer: *mut *mut u8,
) -> Status {
    if buffer.is_null() {
        return Status::INVALID_PARAMETER;
    }
    let result = match (driver, original) {
        (Some(driver), _) => driver.allocate_pool(memory_type, size),
        (None, Some(original)) => original.allocate(memory_type, size),
        (None, None) => return Status::NOT_READY,
    };
    match result {
        Ok(pointer) => {
            // SAFETY: checked non-null above.
            unsafe { buffer.write(pointer.as_ptr()) };
            Status::SUCCESS
        }
        Err(e) => e.status(),
    }
}

/// # Safety
/// `buffer` is null or came from `AllocatePool`.
unsafe fn free_with(
    driver: Option<&SpecialPoolDxe>,
    original: Option<&PoolServices>,
    buffer: *mut u8,
) -> Status {
    let Some(buffer) = NonNull::new(buffer) else {
        return Status::INVALID_PARAMETER;
    };
    // SAFETY: forwarded from the caller.
    let result = unsafe {
        match (driver, original) {
            (Some(driver), _) => driver.free_pool(buffer),
            (None, Some(original)) => original.free(buffer),
            (None, None) => return Status::NOT_READY,
        }
    };
    result.map_or_else(|e| e.status(), |()| Status::SUCCESS)
}
