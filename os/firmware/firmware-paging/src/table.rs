use crate::entry::PageEntry;
use core::sync::atomic::{AtomicU64, Ordering};
use firmware_addresses::{LeafSize, PageSize, Size1G, Size2M, Size4K};

/// Entries per table at every level.
pub const ENTRIES: usize = 512;

/// One 4 KiB translation table, shared with the hardware page walker.
///
/// Entries are atomics: presence toggles on different leaves happen under a
/// shared lock, and the walker may set `A`/`D` at any time.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [AtomicU64; ENTRIES],
}

#[allow(clippy::cast_possible_truncation)]
const _: () = assert!(size_of::<PageTable>() == Size4K::SIZE as usize);

impl PageTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [const { AtomicU64::new(0) }; ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub fn load(&self, index: usize) -> PageEntry {
        PageEntry::from_bits(self.entries[index].load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, index: usize, entry: PageEntry) {
        self.entries[index].store(entry.into_bits(), Ordering::Release);
    }

    /// Replace `current` with `new`; returns the value actually found on mismatch.
    #[inline]
    pub fn compare_exchange(
        &self,
        index: usize,
        current: PageEntry,
        new: PageEntry,
    ) -> Result<PageEntry, PageEntry> {
        self.entries[index]
            .compare_exchange(
                current.into_bits(),
                new.into_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(PageEntry::from_bits)
            .map_err(PageEntry::from_bits)
    }

    pub fn zero(&self) {
        for e in &self.entries {
            e.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of a table in the four-level hierarchy.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Pml4,
    Pdpt,
    Pd,
    Pt,
}

impl Level {
    /// Lowest bit of the virtual address index for this level.
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => Size1G::SHIFT,
            Self::Pd => Size2M::SHIFT,
            Self::Pt => Size4K::SHIFT,
        }
    }

    /// Bytes translated by one entry of a table at this level.
    #[must_use]
    pub const fn entry_coverage(self) -> u64 {
        1 << self.shift()
    }

    /// Size of a leaf stored at this level, if leaves are allowed here.
    #[must_use]
    pub const fn leaf_size(self) -> Option<LeafSize> {
        match self {
            Self::Pml4 => None,
            Self::Pdpt => Some(LeafSize::Size1G),
            Self::Pd => Some(LeafSize::Size2M),
            Self::Pt => Some(LeafSize::Size4K),
        }
    }

    /// The level whose entries are leaves of `size`.
    #[must_use]
    pub const fn for_leaf(size: LeafSize) -> Self {
        match size {
            LeafSize::Size1G => Self::Pdpt,
            LeafSize::Size2M => Self::Pd,
            LeafSize::Size4K => Self::Pt,
        }
    }

    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }
}
