use crate::config::{DataAlignment, PoolConfig};
use crate::memory_type::MemoryType;
use firmware_addresses::{
    PageSize, PhysicalAddress, Size4K, VirtualAddress, VirtualPage, VirtualRange, align_up,
    bytes_of_pages, pages_spanning,
};

/// One live guarded allocation.
///
/// ```text
/// | leading guard | data page 0 | ... | data page n-1 | trailing guard |
/// ^ backing base  ^ data.start()                      ^ data.end()
/// ```
///
/// Either guard may be absent, depending on the [`GuardPlacement`](crate::GuardPlacement).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GuardedAllocation {
    /// Bytes requested by the caller.
    pub size: u64,
    pub memory_type: MemoryType,
    /// Address handed to the caller.
    pub address: VirtualAddress,
    /// Page-aligned data region.
    pub data: VirtualRange,
    pub leading_guard: Option<VirtualPage<Size4K>>,
    pub trailing_guard: Option<VirtualPage<Size4K>>,
    /// First page of the bulk allocation.
    pub backing: PhysicalAddress,
    /// Number of pages in the bulk allocation, guards included.
    pub backing_pages: u64,
}

impl GuardedAllocation {
    /// Pages needed for `size` bytes plus the configured guards, or `None`
    /// if the count overflows.
    #[must_use]
    pub const fn pages_for(config: &PoolConfig, size: u64) -> Option<u64> {
        match pages_spanning(size) {
            Some(data) => data.checked_add(config.guards().pages()),
            None => None,
        }
    }

    /// Lay out an allocation of `size` bytes over the run at `backing`.
    ///
    /// Returns `None` if the run would wrap the address space.
    #[must_use]
    pub fn layout(
        config: &PoolConfig,
        memory_type: MemoryType,
        size: u64,
        backing: PhysicalAddress,
    ) -> Option<Self> {
        let backing_pages = Self::pages_for(config, size)?;
        let data_pages = pages_spanning(size)?;
        let first = backing.page::<Size4K>().identity();

        let (leading_guard, data_start) = if config.guards().leading() {
            (Some(first), first.checked_add(1)?)
        } else {
            (None, first)
        };
        let data = VirtualRange::new(data_start.base(), bytes_of_pages(data_pages)?)?;
        let trailing_guard = if config.guards().trailing() {
            Some(VirtualPage::<Size4K>::from_aligned(data.end())?)
        } else {
            None
        };

        let address = match config.alignment() {
            DataAlignment::Head => data.start(),
            DataAlignment::Tail => {
                let rounded = align_up(size, config.tail_alignment())?.min(data.len());
                data.end().checked_sub(rounded)?
            }
        };

        Some(Self {
            size,
            memory_type,
            address,
            data,
            leading_guard,
            trailing_guard,
            backing,
            backing_pages,
        })
    }

    /// The guard pages, leading first.
    pub fn guards(&self) -> impl Iterator<Item = VirtualPage<Size4K>> + use<> {
        self.leading_guard.into_iter().chain(self.trailing_guard)
    }

    /// The whole bulk run, guards included.
    #[must_use]
    pub fn backing_range(&self) -> VirtualRange {
        let len = self.backing_pages.saturating_mul(Size4K::SIZE);
        VirtualRange::new(self.backing.identity(), len).unwrap_or_else(VirtualRange::empty)
    }
}
