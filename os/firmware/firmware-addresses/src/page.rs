use crate::{PageSize, PhysicalAddress, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// Page base address of size `S` in physical memory (low `S::SHIFT` bits clear).
///
/// ### Examples
/// ```rust
/// # use firmware_addresses::*;
/// let large = PhysicalPage::<Size2M>::containing(PhysicalAddress::new(0x0040_1234));
/// assert_eq!(large.base().as_u64(), 0x0040_0000);
/// let sub = large.sub_page::<Size4K>(3).unwrap();
/// assert_eq!(sub.base().as_u64(), 0x0040_3000);
/// assert_eq!(large.sub_page::<Size4K>(512), None);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

/// Page base address of size `S` in virtual memory (low `S::SHIFT` bits clear).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

/// Number of `Sub`-sized pages inside one `S`-sized page.
#[inline]
const fn sub_pages<S: PageSize, Sub: PageSize>() -> u64 {
    if Sub::SIZE >= S::SIZE {
        1
    } else {
        S::SIZE / Sub::SIZE
    }
}

impl<S: PageSize> PhysicalPage<S> {
    /// Page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self {
            base: addr.as_u64() & !(S::SIZE - 1),
            _size: PhantomData,
        }
    }

    /// Page starting exactly at `addr`, or `None` if unaligned.
    #[inline]
    #[must_use]
    pub const fn from_aligned(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_aligned::<S>() {
            Some(Self::containing(addr))
        } else {
            None
        }
    }

    /// Page with the given frame number (`base >> S::SHIFT`).
    #[inline]
    #[must_use]
    pub const fn from_frame_number(frame: u64) -> Self {
        Self {
            base: frame << S::SHIFT,
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> u64 {
        self.base >> S::SHIFT
    }

    /// Exclusive end address of this page.
    #[inline]
    #[must_use]
    pub const fn end(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.wrapping_add(S::SIZE))
    }

    /// The page `n` pages after this one, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        let Some(bytes) = n.checked_mul(S::SIZE) else {
            return None;
        };
        match self.base.checked_add(bytes) {
            Some(base) => Some(Self {
                base,
                _size: PhantomData,
            }),
            None => None,
        }
    }

    /// The `index`-th `Sub`-sized page inside this page.
    #[inline]
    #[must_use]
    pub const fn sub_page<Sub: PageSize>(self, index: u64) -> Option<PhysicalPage<Sub>> {
        if index >= sub_pages::<S, Sub>() {
            return None;
        }
        Some(PhysicalPage {
            base: self.base + index * Sub::SIZE,
            _size: PhantomData,
        })
    }

    /// Identity-mapped virtual page with the same base.
    #[inline]
    #[must_use]
    pub const fn identity(self) -> VirtualPage<S> {
        VirtualPage {
            base: self.base,
            _size: PhantomData,
        }
    }
}

impl<S: PageSize> VirtualPage<S> {
    /// Page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self {
            base: addr.as_u64() & !(S::SIZE - 1),
            _size: PhantomData,
        }
    }

    /// Page starting exactly at `addr`, or `None` if unaligned.
    #[inline]
    #[must_use]
    pub const fn from_aligned(addr: VirtualAddress) -> Option<Self> {
        if addr.is_aligned::<S>() {
            Some(Self::containing(addr))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }

    /// Exclusive end address of this page.
    #[inline]
    #[must_use]
    pub const fn end(self) -> VirtualAddress {
        VirtualAddress::new(self.base.wrapping_add(S::SIZE))
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        let Some(bytes) = n.checked_mul(S::SIZE) else {
            return None;
        };
        match self.base.checked_add(bytes) {
            Some(base) => Some(Self {
                base,
                _size: PhantomData,
            }),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_sub(self, n: u64) -> Option<Self> {
        let Some(bytes) = n.checked_mul(S::SIZE) else {
            return None;
        };
        match self.base.checked_sub(bytes) {
            Some(base) => Some(Self {
                base,
                _size: PhantomData,
            }),
            None => None,
        }
    }

    /// Identity-mapped physical page with the same base.
    #[inline]
    #[must_use]
    pub const fn identity(self) -> PhysicalPage<S> {
        PhysicalPage {
            base: self.base,
            _size: PhantomData,
        }
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>(0x{:016X})", S::LEAF, self.base)
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.base, S::LEAF)
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>(0x{:016X})", S::LEAF, self.base)
    }
}

impl<S: PageSize> fmt::Display for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.base, S::LEAF)
    }
}
