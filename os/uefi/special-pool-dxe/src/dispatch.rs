//! `AllocatePool`/`FreePool` routing between the special pool and the
//! firmware's own pool.

#![allow(unsafe_code)]

use crate::constructor::DxePool;
use crate::hooks::PoolServices;
use core::ptr::NonNull;
use firmware_addresses::VirtualAddress;
use firmware_special_pool::{FaultRouting, MemoryType as PoolMemoryType, PoolError, StackGuard};
use log::warn;
use uefi::Status;
use uefi::boot::MemoryType;

/// The running driver: the pool plus whatever stack guarding came up.
#[derive(Debug)]
pub struct SpecialPoolDxe {
    pool: DxePool,
    fallback: &'static PoolServices,
    stack_guard: Option<StackGuard>,
    routing: Option<FaultRouting>,
}

impl SpecialPoolDxe {
    /// `fallback` serves everything the special pool does not.
    pub const fn new(pool: DxePool, fallback: &'static PoolServices) -> Self {
        Self {
            pool,
            fallback,
            stack_guard: None,
            routing: None,
        }
    }

    pub const fn pool(&self) -> &DxePool {
        &self.pool
    }

    pub const fn stack_guard(&self) -> Option<&StackGuard> {
        self.stack_guard.as_ref()
    }

    pub const fn fault_routing(&self) -> Option<FaultRouting> {
        self.routing
    }

    pub(crate) fn set_stack_guard(&mut self, guard: StackGuard) {
        self.stack_guard = Some(guard);
    }

    pub(crate) fn set_fault_routing(&mut self, routing: FaultRouting) {
        self.routing = Some(routing);
    }

    /// Allocate `size` bytes of `memory_type`.
    ///
    /// Monitored types come from the special pool while its tables are in
    /// use; everything else, and every request the pool cannot serve because
    /// paging is unsupported or inactive, goes to the firmware's pool.
    ///
    /// # Errors
    /// The pool's errors as UEFI status codes, or boot services' own.
    pub fn allocate_pool(&self, memory_type: MemoryType, size: usize) -> uefi::Result<NonNull<u8>> {
        let pool_type = PoolMemoryType(memory_type.0);
        if self.pool.monitors(pool_type) {
            let size = u64::try_from(size).map_err(|_| Status::INVALID_PARAMETER)?;
            match self.pool.allocate_typed(pool_type, size) {
                Ok(address) => {
                    return NonNull::new(address.as_mut_ptr())
                        .ok_or_else(|| Status::OUT_OF_RESOURCES.into());
                }
                Err(PoolError::Unsupported | PoolError::Inactive) => {}
                Err(e) => {
                    warn!("Special pool rejected {size} bytes of {pool_type}: {e}");
                    return Err(status_of(e).into());
                }
            }
        }
        self.fallback.allocate(memory_type, size)
    }

    /// Free a buffer from [`allocate_pool`](Self::allocate_pool).
    ///
    /// # Safety
    /// `buffer` must come from `allocate_pool` (or boot services) and not be
    /// used afterwards.
    ///
    /// # Errors
    /// The pool's errors as UEFI status codes, or boot services' own.
    pub unsafe fn free_pool(&self, buffer: NonNull<u8>) -> uefi::Result {
        let address = VirtualAddress::from_nonnull(buffer);
        if self.pool.owns(address) {
            return self.pool.free(address).map_err(|e| status_of(e).into());
        }
        // SAFETY: not ours, so it came from the firmware's pool.
        unsafe { self.fallback.free(buffer) }
    }
}

/// The UEFI status a pool error is reported as.
pub const fn status_of(error: PoolError) -> Status {
    match error {
        PoolError::InvalidParameter => Status::INVALID_PARAMETER,
        PoolError::OutOfResources => Status::OUT_OF_RESOURCES,
        PoolError::Unsupported => Status::UNSUPPORTED,
        PoolError::Inactive => Status::NOT_READY,
        PoolError::Paging(_) => Status::DEVICE_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firmware_paging::PagingError;

    #[test]
    fn pool_errors_map_to_uefi_status() {
        assert_eq!(status_of(PoolError::InvalidParameter), Status::INVALID_PARAMETER);
        assert_eq!(status_of(PoolError::OutOfResources), Status::OUT_OF_RESOURCES);
        assert_eq!(status_of(PoolError::Unsupported), Status::UNSUPPORTED);
        assert_eq!(status_of(PoolError::Inactive), Status::NOT_READY);
        assert_eq!(
            status_of(PoolError::Paging(PagingError::OutOfTableFrames)),
            Status::DEVICE_ERROR
        );
    }

    #[test]
    fn status_codes_are_errors() {
        for error in [
            PoolError::InvalidParameter,
            PoolError::OutOfResources,
            PoolError::Unsupported,
            PoolError::Inactive,
        ] {
            assert!(status_of(error).is_error());
        }
    }
}
