use firmware_paging::PagingError;

/// Errors of [`SpecialPool`](crate::SpecialPool) operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Zero or overflowing sizes, and frees of addresses the pool never returned.
    #[error("invalid parameter")]
    InvalidParameter,
    /// The bulk allocator or the page table frame source ran dry.
    #[error("out of resources")]
    OutOfResources,
    #[error("guard pages are not supported on this platform")]
    Unsupported,
    /// The CPU translates through a hierarchy the pool does not edit.
    #[error("the special pool page tables are not active")]
    Inactive,
    #[error(transparent)]
    Paging(#[from] PagingError),
}

impl PoolError {
    /// Fold the paging errors callers treat uniformly into pool errors.
    pub(crate) const fn from_paging(error: PagingError) -> Self {
        match error {
            PagingError::OutOfTableFrames => Self::OutOfResources,
            PagingError::Unsupported => Self::Unsupported,
            other => Self::Paging(other),
        }
    }
}

/// Errors of the stack-fault guard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackGuardError {
    #[error("the stack range is empty")]
    EmptyStack,
    /// The stack touches the end of the address space in its growth direction.
    #[error("no page next to the stack in its growth direction")]
    NoGuardPage,
    #[error("guard pages are not supported on this platform")]
    Unsupported,
    #[error("the stack-fault vector could not be armed")]
    VectorRejected,
    #[error(transparent)]
    Paging(#[from] PagingError),
}

impl StackGuardError {
    pub(crate) const fn from_paging(error: PagingError) -> Self {
        match error {
            PagingError::Unsupported => Self::Unsupported,
            other => Self::Paging(other),
        }
    }
}
