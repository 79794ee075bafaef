use crate::{PageSize, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage, align_up};
use core::fmt;
use core::iter::FusedIterator;

/// Half-open range `[start, end)` of virtual addresses.
///
/// ### Examples
/// ```rust
/// # use firmware_addresses::*;
/// let r = VirtualRange::new(VirtualAddress::new(0x1800), 0x1000).unwrap();
/// let pages: Vec<_> = r.pages::<Size4K>().map(|p| p.base().as_u64()).collect();
/// assert_eq!(pages, [0x1000, 0x2000]);
/// assert!(r.contains(VirtualAddress::new(0x27FF)));
/// assert!(!r.contains(VirtualAddress::new(0x2800)));
/// ```
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct VirtualRange {
    start: VirtualAddress,
    end: VirtualAddress,
}

/// Half-open range `[start, end)` of physical addresses.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PhysicalRange {
    start: PhysicalAddress,
    end: PhysicalAddress,
}

impl VirtualRange {
    /// Range of `len` bytes starting at `start`, or `None` if it wraps.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    /// Range between two bounds, or `None` if `end < start`.
    #[inline]
    #[must_use]
    pub const fn from_bounds(start: VirtualAddress, end: VirtualAddress) -> Option<Self> {
        if end.as_u64() < start.as_u64() {
            None
        } else {
            Some(Self { start, end })
        }
    }

    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            start: VirtualAddress::zero(),
            end: VirtualAddress::zero(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(self) -> VirtualAddress {
        self.start
    }

    /// Exclusive end.
    #[inline]
    #[must_use]
    pub const fn end(self) -> VirtualAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn len(self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end.as_u64()
            && other.start.as_u64() < self.end.as_u64()
    }

    /// Every `S`-sized page touching this range, in ascending order.
    #[inline]
    #[must_use]
    pub fn pages<S: PageSize>(self) -> Pages<S> {
        let first = VirtualPage::<S>::containing(self.start);
        let end = if self.is_empty() {
            first.base().as_u64()
        } else {
            // A range ending in the last page of the address space saturates.
            align_up(self.end.as_u64(), S::SIZE).unwrap_or(u64::MAX)
        };
        Pages {
            next: Some(first),
            end,
        }
    }

    /// The same range under an identity map.
    #[inline]
    #[must_use]
    pub const fn identity(self) -> PhysicalRange {
        PhysicalRange {
            start: self.start.identity(),
            end: self.end.identity(),
        }
    }
}

impl PhysicalRange {
    /// Range of `len` bytes starting at `start`, or `None` if it wraps.
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalAddress, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            start: PhysicalAddress::zero(),
            end: PhysicalAddress::zero(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(self) -> PhysicalAddress {
        self.start
    }

    /// Exclusive end.
    #[inline]
    #[must_use]
    pub const fn end(self) -> PhysicalAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn len(self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end.as_u64()
            && other.start.as_u64() < self.end.as_u64()
    }

    /// Whether any byte of `page` falls into this range.
    #[inline]
    #[must_use]
    pub const fn overlaps_page<S: PageSize>(self, page: PhysicalPage<S>) -> bool {
        self.overlaps(Self {
            start: page.base(),
            end: page.end(),
        })
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA[0x{:016X}..0x{:016X})", self.start.as_u64(), self.end.as_u64())
    }
}

impl fmt::Display for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

impl fmt::Debug for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA[0x{:016X}..0x{:016X})", self.start.as_u64(), self.end.as_u64())
    }
}

impl fmt::Display for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

/// Iterator over the pages of a [`VirtualRange`].
#[derive(Clone, Debug)]
pub struct Pages<S: PageSize> {
    next: Option<VirtualPage<S>>,
    end: u64,
}

impl<S: PageSize> Iterator for Pages<S> {
    type Item = VirtualPage<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.next?;
        if page.base().as_u64() >= self.end {
            self.next = None;
            return None;
        }
        self.next = page.checked_add(1);
        Some(page)
    }
}

impl<S: PageSize> FusedIterator for Pages<S> {}
