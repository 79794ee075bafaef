//! Raw x86-64 paging entries and the bit surgery needed to demote large leaves.

use bitfield_struct::bitfield;
use firmware_addresses::{LeafSize, PhysicalAddress, PhysicalPage, Size4K};

/// Physical address bits of a 4 KiB leaf or a table pointer (51:12).
pub const ADDRESS_MASK_4K: u64 = 0x000F_FFFF_FFFF_F000;
/// Physical address bits of a 2 MiB leaf (51:21).
pub const ADDRESS_MASK_2M: u64 = 0x000F_FFFF_FFE0_0000;
/// Physical address bits of a 1 GiB leaf (51:30).
pub const ADDRESS_MASK_1G: u64 = 0x000F_FFFF_C000_0000;

/// Bit 7: PS in PDPT/PD entries, PAT in PT entries.
pub const PAGE_SIZE_BIT: u64 = 1 << 7;
/// Bit 12: PAT selector of a large leaf.
pub const PAT_LARGE_BIT: u64 = 1 << 12;

const PRESENT: u64 = 1 << 0;
const WRITABLE: u64 = 1 << 1;
const USER: u64 = 1 << 2;

/// One 64-bit paging entry, the common superset of PML4E/PDPTE/PDE/PTE.
///
/// | Bits  | Field |
/// |-------|-------|
/// | 0     | `P` present |
/// | 1     | `RW` writable |
/// | 2     | `US` user |
/// | 3     | `PWT` |
/// | 4     | `PCD` |
/// | 5     | `A` accessed |
/// | 6     | `D` dirty (leaf only) |
/// | 7     | `PS` in PDPTE/PDE, `PAT` in a PTE |
/// | 8     | `G` global (leaf only) |
/// | 9–11  | OS available |
/// | 12–51 | frame (bit 12 is `PAT` in large leaves) |
/// | 52–58 | OS available |
/// | 59–62 | protection key |
/// | 63    | `NX` |
///
/// Everything except the presence, accessed and dirty bits is opaque to the
/// special pool and must survive every edit.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    /// PS for PDPT/PD entries; PAT for PT entries.
    pub page_size: bool,
    pub global: bool,
    #[bits(3)]
    pub os_low: u8,
    #[bits(40)]
    pub frame: u64,
    #[bits(7)]
    pub os_high: u8,
    #[bits(4)]
    pub protection_key: u8,
    pub no_execute: bool,
}

impl PageEntry {
    /// A present, writable leaf for `address` of the given size.
    ///
    /// Large leaves get `PS` set; `address` must be aligned to `size`.
    #[must_use]
    pub const fn leaf(address: PhysicalAddress, size: LeafSize) -> Self {
        let mut raw = (address.as_u64() & leaf_mask(size)) | PRESENT | WRITABLE;
        if size.is_large() {
            raw |= PAGE_SIZE_BIT;
        }
        Self::from_bits(raw)
    }

    /// Pointer to the next-level table in `frame`, inheriting `RW`/`US` from `from`.
    ///
    /// Used when a large leaf is replaced by a table of demoted leaves: the
    /// demoted leaves carry the full attributes, so the pointer only needs to
    /// stay at least as permissive as the leaf it replaces.
    #[must_use]
    pub const fn table_pointer(frame: PhysicalPage<Size4K>, from: Self) -> Self {
        let inherited = from.into_bits() & (WRITABLE | USER);
        Self::from_bits(frame.base().as_u64() | PRESENT | inherited)
    }

    /// Pointer to a freshly created table (present, writable).
    #[must_use]
    pub const fn new_table_pointer(frame: PhysicalPage<Size4K>) -> Self {
        Self::from_bits(frame.base().as_u64() | PRESENT | WRITABLE)
    }

    /// The table frame a non-leaf entry points to.
    #[must_use]
    pub const fn table_frame(self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(PhysicalAddress::new(self.into_bits() & ADDRESS_MASK_4K))
    }

    /// Physical base of the page mapped by this leaf.
    #[must_use]
    pub const fn leaf_address(self, size: LeafSize) -> PhysicalAddress {
        PhysicalAddress::new(self.into_bits() & leaf_mask(size))
    }

    /// PAT selector, wherever `size` keeps it.
    #[must_use]
    pub const fn pat(self, size: LeafSize) -> bool {
        let bit = if size.is_large() { PAT_LARGE_BIT } else { PAGE_SIZE_BIT };
        self.into_bits() & bit != 0
    }

    /// This entry made not-present with `A`/`D` cleared.
    #[must_use]
    pub const fn disabled(self) -> Self {
        self.with_present(false).with_accessed(false).with_dirty(false)
    }

    /// Sub-leaf `index` (0..512) of this large leaf after one demotion.
    ///
    /// The sub-leaf maps `base + index * sub_size` and keeps every other bit.
    /// Demoting into 4 KiB clears `PS` and moves `PAT` from bit 12 to bit 7;
    /// demoting 1 GiB into 2 MiB keeps both in place.
    #[must_use]
    pub const fn demoted(self, size: LeafSize, index: u64) -> Option<Self> {
        let Some(sub) = size.demoted() else {
            return None;
        };
        if index >= 512 {
            return None;
        }
        let raw = self.into_bits();
        let base = raw & leaf_mask(size);
        let address = base + index * sub.bytes();
        let sub_raw = match sub {
            LeafSize::Size4K => {
                let attrs = raw & !(ADDRESS_MASK_4K | PAGE_SIZE_BIT);
                let pat = if raw & PAT_LARGE_BIT != 0 { PAGE_SIZE_BIT } else { 0 };
                attrs | address | pat
            }
            LeafSize::Size2M | LeafSize::Size1G => (raw & !ADDRESS_MASK_2M) | address,
        };
        Some(Self::from_bits(sub_raw))
    }
}

/// Address mask of a leaf of the given size.
#[must_use]
pub const fn leaf_mask(size: LeafSize) -> u64 {
    match size {
        LeafSize::Size4K => ADDRESS_MASK_4K,
        LeafSize::Size2M => ADDRESS_MASK_2M,
        LeafSize::Size1G => ADDRESS_MASK_1G,
    }
}

/// Effective access rights of a translation (intersection across the walk).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Permissions {
    pub writable: bool,
    pub user: bool,
    pub executable: bool,
}

impl Permissions {
    /// Rights before any entry has been applied.
    pub const ALL: Self = Self {
        writable: true,
        user: true,
        executable: true,
    };

    #[must_use]
    pub const fn restricted_by(self, entry: PageEntry) -> Self {
        Self {
            writable: self.writable && entry.writable(),
            user: self.user && entry.user(),
            executable: self.executable && !entry.no_execute(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demote_2m_moves_pat() {
        // P | RW | PCD | PS | G | PAT(12) | NX | OS bit 52 | base 0x4020_0000
        let raw = 0x4020_0000 | 0b1_1001_0011 | PAT_LARGE_BIT | (1 << 52) | (1 << 63);
        let large = PageEntry::from_bits(raw);
        let sub = large.demoted(LeafSize::Size2M, 2).unwrap();
        assert_eq!(sub.leaf_address(LeafSize::Size4K).as_u64(), 0x4020_2000);
        assert!(sub.pat(LeafSize::Size4K));
        assert!(sub.global());
        assert!(sub.cache_disable());
        assert!(sub.no_execute());
        assert_eq!(sub.os_high(), 1);
        assert_eq!(sub.into_bits() & PAT_LARGE_BIT, 0);
    }

    #[test]
    fn demote_2m_without_pat_clears_bit7() {
        let large = PageEntry::leaf(PhysicalAddress::new(0x20_0000), LeafSize::Size2M);
        let sub = large.demoted(LeafSize::Size2M, 511).unwrap();
        assert!(!sub.page_size());
        assert_eq!(sub.leaf_address(LeafSize::Size4K).as_u64(), 0x3F_F000);
    }

    #[test]
    fn demote_1g_keeps_ps_and_pat() {
        let raw = 0x4000_0000 | 0b1000_0011 | PAT_LARGE_BIT | (0b1010 << 59);
        let sub = PageEntry::from_bits(raw).demoted(LeafSize::Size1G, 2).unwrap();
        assert!(sub.page_size());
        assert!(sub.pat(LeafSize::Size2M));
        assert_eq!(sub.protection_key(), 0b1010);
        assert_eq!(sub.leaf_address(LeafSize::Size2M).as_u64(), 0x4040_0000);
    }

    #[test]
    fn demote_rejects_4k_and_out_of_range_index() {
        let small = PageEntry::leaf(PhysicalAddress::new(0x1000), LeafSize::Size4K);
        assert!(small.demoted(LeafSize::Size4K, 0).is_none());
        let large = PageEntry::leaf(PhysicalAddress::new(0), LeafSize::Size2M);
        assert!(large.demoted(LeafSize::Size2M, 512).is_none());
    }

    #[test]
    fn disabled_clears_only_p_a_d() {
        let e = PageEntry::from_bits(0x8000_0000_0000_5163 | (1 << 9));
        let d = e.disabled();
        assert_eq!(d.into_bits(), e.into_bits() & !0b110_0001);
    }

    #[test]
    fn pointer_inherits_rw_us_only() {
        let large = PageEntry::from_bits(0x20_0000 | 0b1001_0101 | (1 << 63));
        let frame = PhysicalPage::containing(PhysicalAddress::new(0x7000));
        let ptr = PageEntry::table_pointer(frame, large);
        assert_eq!(ptr.into_bits(), 0x7000 | 0b101);
        assert_eq!(ptr.table_frame(), frame);
    }
}
