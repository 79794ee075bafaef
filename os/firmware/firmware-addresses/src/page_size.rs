use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the three x86-64 translation granules.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Runtime counterpart of this marker.
    const LEAF: LeafSize;
}

/// 4 KiB page, the fine-grained granule every guard page uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const LEAF: LeafSize = LeafSize::Size4K;
}

/// 2 MiB large page (PD leaf).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size2M;
impl sealed::Sealed for Size2M {}
impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;
    const LEAF: LeafSize = LeafSize::Size2M;
}

/// 1 GiB large page (PDPT leaf).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size1G;
impl sealed::Sealed for Size1G {}
impl PageSize for Size1G {
    const SIZE: u64 = 1024 * 1024 * 1024;
    const SHIFT: u32 = 30;
    const LEAF: LeafSize = LeafSize::Size1G;
}

/// Size of a leaf found at runtime while walking a hierarchy.
///
/// The type-level markers above cover code that knows the granule up front;
/// a walk only learns it from the PS bit, hence this enum.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LeafSize {
    /// 4 KiB page mapped by a PT entry.
    Size4K,
    /// 2 MiB page mapped by a PD entry with `PS=1`.
    Size2M,
    /// 1 GiB page mapped by a PDPT entry with `PS=1`.
    Size1G,
}

impl LeafSize {
    /// Bytes covered by one leaf of this size.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size4K => Size4K::SIZE,
            Self::Size2M => Size2M::SIZE,
            Self::Size1G => Size1G::SIZE,
        }
    }

    /// Number of low address bits that select a byte within the leaf.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Size4K => Size4K::SHIFT,
            Self::Size2M => Size2M::SHIFT,
            Self::Size1G => Size1G::SHIFT,
        }
    }

    /// The size one split produces, or `None` for 4 KiB.
    #[inline]
    #[must_use]
    pub const fn demoted(self) -> Option<Self> {
        match self {
            Self::Size4K => None,
            Self::Size2M => Some(Self::Size4K),
            Self::Size1G => Some(Self::Size2M),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_large(self) -> bool {
        !matches!(self, Self::Size4K)
    }
}

impl fmt::Display for LeafSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Size4K => "4K",
            Self::Size2M => "2M",
            Self::Size1G => "1G",
        })
    }
}
