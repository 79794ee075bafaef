use crate::memory_type::{MemoryType, MemoryTypeMask};
use firmware_addresses::{PageSize, Size4K, VirtualAddress, VirtualRange};

/// End of the range made fine-grained by default (the low 2.25 GiB).
pub const DEFAULT_RANGE_END: u64 = 0x9000_0000;

/// Default rounding of a tail-aligned allocation's size.
pub const DEFAULT_TAIL_ALIGNMENT: u64 = 8;

/// Default number of poisoned allocations kept before the oldest is released.
pub const DEFAULT_QUARANTINE_DEPTH: usize = 16;

/// Which sides of an allocation get a guard page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GuardPlacement {
    /// Below the data only; catches underruns.
    Leading,
    /// Above the data only; catches overruns.
    Trailing,
    Both,
}

impl GuardPlacement {
    #[must_use]
    pub const fn leading(self) -> bool {
        matches!(self, Self::Leading | Self::Both)
    }

    #[must_use]
    pub const fn trailing(self) -> bool {
        matches!(self, Self::Trailing | Self::Both)
    }

    /// Number of guard pages per allocation.
    #[must_use]
    pub const fn pages(self) -> u64 {
        match self {
            Self::Leading | Self::Trailing => 1,
            Self::Both => 2,
        }
    }
}

/// Where the returned address sits inside the data pages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataAlignment {
    /// At the start of the first data page; underruns fault immediately.
    Head,
    /// So that the data ends at the trailing guard; overruns fault immediately.
    Tail,
}

/// Runtime configuration of a [`SpecialPool`](crate::SpecialPool).
///
/// ```rust
/// # use firmware_special_pool::*;
/// let config = PoolConfig::new()
///     .with_alignment(DataAlignment::Tail)
///     .with_tail_alignment(16)
///     .with_poison_freed(true);
/// assert_eq!(config.guards(), GuardPlacement::Both);
/// assert_eq!(config.tail_alignment(), 16);
/// assert!(config.monitors(MemoryType::BOOT_SERVICES_DATA));
/// assert!(!config.monitors(MemoryType::LOADER_DATA));
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolConfig {
    guards: GuardPlacement,
    alignment: DataAlignment,
    tail_alignment: u64,
    poison_freed: bool,
    quarantine_depth: usize,
    memory_types: MemoryTypeMask,
    range: VirtualRange,
    trap_null_page: bool,
    stack_fault_handling: bool,
}

impl PoolConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            guards: GuardPlacement::Both,
            alignment: DataAlignment::Head,
            tail_alignment: DEFAULT_TAIL_ALIGNMENT,
            poison_freed: false,
            quarantine_depth: DEFAULT_QUARANTINE_DEPTH,
            memory_types: MemoryTypeMask::empty().with(MemoryType::BOOT_SERVICES_DATA),
            range: match VirtualRange::new(VirtualAddress::zero(), DEFAULT_RANGE_END) {
                Some(range) => range,
                None => VirtualRange::empty(),
            },
            trap_null_page: false,
            stack_fault_handling: false,
        }
    }

    #[must_use]
    pub const fn with_guards(mut self, guards: GuardPlacement) -> Self {
        self.guards = guards;
        self
    }

    #[must_use]
    pub const fn with_alignment(mut self, alignment: DataAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Round tail-aligned sizes up to `align`, itself rounded up to a power
    /// of two and clamped to `1..=4096`.
    #[must_use]
    pub const fn with_tail_alignment(mut self, align: u64) -> Self {
        self.tail_alignment = if align <= 1 {
            1
        } else if align >= Size4K::SIZE {
            Size4K::SIZE
        } else {
            align.next_power_of_two()
        };
        self
    }

    #[must_use]
    pub const fn with_poison_freed(mut self, enabled: bool) -> Self {
        self.poison_freed = enabled;
        self
    }

    #[must_use]
    pub const fn with_quarantine_depth(mut self, depth: usize) -> Self {
        self.quarantine_depth = depth;
        self
    }

    #[must_use]
    pub const fn with_memory_types(mut self, mask: MemoryTypeMask) -> Self {
        self.memory_types = mask;
        self
    }

    /// The address range split to 4 KiB leaves by [`SpecialPool::prepare`](crate::SpecialPool::prepare).
    #[must_use]
    pub const fn with_range(mut self, range: VirtualRange) -> Self {
        self.range = range;
        self
    }

    #[must_use]
    pub const fn with_trap_null_page(mut self, enabled: bool) -> Self {
        self.trap_null_page = enabled;
        self
    }

    #[must_use]
    pub const fn with_stack_fault_handling(mut self, enabled: bool) -> Self {
        self.stack_fault_handling = enabled;
        self
    }

    #[must_use]
    pub const fn guards(&self) -> GuardPlacement {
        self.guards
    }

    #[must_use]
    pub const fn alignment(&self) -> DataAlignment {
        self.alignment
    }

    #[must_use]
    pub const fn tail_alignment(&self) -> u64 {
        self.tail_alignment
    }

    #[must_use]
    pub const fn poison_freed(&self) -> bool {
        self.poison_freed
    }

    #[must_use]
    pub const fn quarantine_depth(&self) -> usize {
        self.quarantine_depth
    }

    #[must_use]
    pub const fn memory_types(&self) -> MemoryTypeMask {
        self.memory_types
    }

    #[must_use]
    pub const fn range(&self) -> VirtualRange {
        self.range
    }

    #[must_use]
    pub const fn trap_null_page(&self) -> bool {
        self.trap_null_page
    }

    #[must_use]
    pub const fn stack_fault_handling(&self) -> bool {
        self.stack_fault_handling
    }

    /// Whether requests of `memory_type` go to the special pool.
    #[must_use]
    pub const fn monitors(&self, memory_type: MemoryType) -> bool {
        self.memory_types.contains(memory_type)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}
