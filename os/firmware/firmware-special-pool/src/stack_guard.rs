//! A not-present page next to a stack, so that overflowing it faults at the
//! first access instead of silently corrupting whatever lies beyond.

use crate::error::StackGuardError;
use firmware_addresses::{
    PageSize, Size4K, VirtualAddress, VirtualPage, VirtualRange, align_up,
};
use firmware_paging::PageProtection;
use log::{info, warn};

/// Direction in which a stack grows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StackGrowth {
    /// Towards lower addresses, as on x86-64.
    Down,
    Up,
}

/// An installed stack guard.
///
/// Dropping it leaves the guard page disabled; it lives as long as the stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub struct StackGuard {
    page: VirtualPage<Size4K>,
    stack: VirtualRange,
    growth: StackGrowth,
}

impl StackGuard {
    #[must_use]
    pub const fn page(&self) -> VirtualPage<Size4K> {
        self.page
    }

    #[must_use]
    pub const fn stack(&self) -> VirtualRange {
        self.stack
    }

    #[must_use]
    pub const fn growth(&self) -> StackGrowth {
        self.growth
    }

    /// Whether a fault at `address` hit this guard.
    #[must_use]
    pub fn is_hit(&self, address: VirtualAddress) -> bool {
        address.page::<Size4K>() == self.page
    }
}

/// The 4 KiB page adjacent to `stack` in its growth direction.
///
/// # Errors
/// [`StackGuardError::EmptyStack`] or [`StackGuardError::NoGuardPage`] when
/// the stack touches the edge of the address space.
pub fn guard_page(stack: VirtualRange, growth: StackGrowth) -> Result<VirtualPage<Size4K>, StackGuardError> {
    if stack.is_empty() {
        return Err(StackGuardError::EmptyStack);
    }
    let page = match growth {
        StackGrowth::Down => VirtualPage::<Size4K>::containing(stack.start()).checked_sub(1),
        StackGrowth::Up => align_up(stack.end().as_u64(), Size4K::SIZE)
            .map(|top| VirtualPage::containing(VirtualAddress::new(top))),
    };
    page.ok_or(StackGuardError::NoGuardPage)
}

/// Disable the page adjacent to `stack` in its growth direction.
///
/// Splitting the covering leaf never places a page table inside the stack.
///
/// # Errors
/// [`StackGuardError::Unsupported`] without flat paging, the [`guard_page`]
/// errors, or the paging error that prevented the split or the disable.
pub fn install_stack_guard<P: PageProtection + ?Sized>(
    paging: &P,
    stack: VirtualRange,
    growth: StackGrowth,
) -> Result<StackGuard, StackGuardError> {
    if !paging.is_supported() {
        return Err(StackGuardError::Unsupported);
    }
    let page = guard_page(stack, growth)?;
    let range = VirtualRange::new(page.base(), Size4K::SIZE).ok_or(StackGuardError::NoGuardPage)?;
    paging
        .ensure_fine_grained(range, stack.identity())
        .map_err(StackGuardError::from_paging)?;
    paging
        .disable_page(page.base())
        .map_err(StackGuardError::from_paging)?;
    info!("Stack guard at {page} for stack {stack} growing {growth:?}");
    Ok(StackGuard { page, stack, growth })
}

/// How stack overflows reach the fault handler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultRouting {
    /// A dedicated vector with its own known-good stack.
    Dedicated,
    /// The ordinary page-fault path; it may itself fault on the exhausted stack.
    GenericPageFault,
}

/// A platform hook that routes stack faults to a dedicated handler.
pub trait StackFaultVector {
    /// Arm the vector.
    ///
    /// # Errors
    /// [`StackGuardError::VectorRejected`] if the platform refuses.
    fn arm(&self) -> Result<(), StackGuardError>;
}

/// Arm the dedicated stack-fault vector, if the platform has one.
///
/// Without one this does nothing and reports [`FaultRouting::GenericPageFault`].
///
/// # Errors
/// Whatever [`StackFaultVector::arm`] fails with.
pub fn initialize_stack_fault_handling(
    vector: Option<&dyn StackFaultVector>,
) -> Result<FaultRouting, StackGuardError> {
    let Some(vector) = vector else {
        warn!("No dedicated stack-fault vector; overflows take the generic page-fault path");
        return Ok(FaultRouting::GenericPageFault);
    };
    vector.arm()?;
    info!("Dedicated stack-fault vector armed");
    Ok(FaultRouting::Dedicated)
}
