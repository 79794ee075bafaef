//! # Firmware Address Types
//!
//! Strongly typed wrappers for physical and virtual addresses, page bases and
//! address ranges used by the page table editor and the special pool.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] / [`VirtualAddress`] | Raw 64-bit addresses in either space. |
//! | [`PhysicalPage<S>`] / [`VirtualPage<S>`] | Page base of size [`S: PageSize`](PageSize). |
//! | [`PhysicalRange`] / [`VirtualRange`] | Half-open address ranges with page iteration. |
//! | [`LeafSize`] | Runtime page size discovered while walking a hierarchy. |
//!
//! The firmware runs identity mapped, so every virtual address equals its
//! physical address. The split into two types still catches code that feeds
//! a table frame where a mapped address is expected; conversions go through
//! the explicit `identity()` helpers.
//!
//! All page-size arithmetic (alignment, rounding, page counts) lives here so
//! that the editor and the pool never shift or mask raw integers themselves.
//!
//! ```rust
//! # use firmware_addresses::*;
//! assert_eq!(pages_spanning(1), Some(1));
//! assert_eq!(pages_spanning(4097), Some(2));
//! assert_eq!(align_up(0x1001, Size4K::SIZE), Some(0x2000));
//! assert_eq!(align_down(0x1FFF, Size4K::SIZE), 0x1000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page;
mod page_size;
mod physical_address;
mod range;
mod virtual_address;

pub use page::{PhysicalPage, VirtualPage};
pub use page_size::{LeafSize, PageSize, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use range::{Pages, PhysicalRange, VirtualRange};
pub use virtual_address::VirtualAddress;

/// Round `value` up to a multiple of the power-of-two `align`.
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Round `value` down to a multiple of the power-of-two `align`.
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Number of 4 KiB pages needed to hold `bytes`, or `None` on overflow.
#[inline]
#[must_use]
pub const fn pages_spanning(bytes: u64) -> Option<u64> {
    match align_up(bytes, Size4K::SIZE) {
        Some(v) => Some(v >> Size4K::SHIFT),
        None => None,
    }
}

/// Bytes covered by `pages` 4 KiB pages, or `None` on overflow.
#[inline]
#[must_use]
pub const fn bytes_of_pages(pages: u64) -> Option<u64> {
    pages.checked_mul(Size4K::SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_containing_aligns_down() {
        let a = VirtualAddress::new(0x1234_5678_9ABC_DEF0);
        let p = a.page::<Size4K>();
        assert_eq!(p.base().as_u64(), 0x1234_5678_9ABC_D000);
        assert_eq!(a.offset::<Size4K>(), 0xEF0);
    }

    #[test]
    fn table_indices_4level() {
        let a = VirtualAddress::new(0xFFFF_8000_4020_3000);
        assert_eq!(a.table_index(39), 256);
        assert_eq!(a.table_index(30), 1);
        assert_eq!(a.table_index(21), 1);
        assert_eq!(a.table_index(12), 3);
    }

    #[test]
    fn page_count_overflow() {
        assert_eq!(pages_spanning(0), Some(0));
        assert_eq!(pages_spanning(u64::MAX), None);
        assert_eq!(bytes_of_pages(u64::MAX), None);
    }

    #[test]
    fn sub_pages_of_1g() {
        let g = PhysicalPage::<Size1G>::containing(PhysicalAddress::new(0x4000_0000));
        let last = g.sub_page::<Size2M>(511).unwrap();
        assert_eq!(last.base().as_u64(), 0x4000_0000 + 511 * Size2M::SIZE);
        assert_eq!(last.end(), g.end());
        assert!(g.sub_page::<Size2M>(512).is_none());
    }

    #[test]
    fn leaf_size_demotion() {
        assert_eq!(LeafSize::Size1G.demoted(), Some(LeafSize::Size2M));
        assert_eq!(LeafSize::Size4K.demoted(), None);
        assert_eq!(Size2M::LEAF.bytes(), Size2M::SIZE);
    }
}
