//! Attribute preservation across splits and toggles, on hand-built hierarchies
//! whose large leaves carry arbitrary attribute bits.

use firmware_addresses::{
    LeafSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K, VirtualAddress, VirtualRange,
};
use firmware_paging::host::{HostMemory, RecordingCache, ScratchFrames};
use firmware_paging::{
    ADDRESS_MASK_2M, IdentityMapConfig, PAGE_SIZE_BIT, PAT_LARGE_BIT, PageEntry, PageTable,
    PageTableEditor, PhysMapper,
};
use proptest::prelude::*;

const PML4: u64 = 0x10_0000;
const PDPT: u64 = 0x10_1000;
const PD: u64 = 0x10_2000;
const FIRST_FREE: u64 = 0x10_3000;

/// RW, US, PWT, PCD, A, D, G, OS bits, PAT (large), OS high, key and NX.
const ATTRIBUTE_BITS: u64 = 0xF7E
    | PAT_LARGE_BIT
    | (0x7F << 52)
    | (0xF << 59)
    | (1 << 63);

fn table(memory: &HostMemory, address: u64) -> &PageTable {
    let frame = PhysicalPage::<Size4K>::containing(PhysicalAddress::new(address));
    // SAFETY: the frame lies inside `memory`.
    unsafe { memory.table(frame) }.unwrap()
}

fn pointer(address: u64) -> PageEntry {
    PageEntry::new_table_pointer(PhysicalPage::containing(PhysicalAddress::new(address)))
        .with_user(true)
}

/// PML4[0] -> PDPT[0] -> PD, with PD[0..4] 2 MiB leaves and PDPT[1] a 1 GiB leaf.
fn hand_built(attributes: u64) -> HostMemory {
    let memory = HostMemory::new(PhysicalAddress::new(PML4), 16);
    table(&memory, PML4).store(0, pointer(PDPT));
    table(&memory, PDPT).store(0, pointer(PD));
    for i in 0..4u64 {
        let leaf = PageEntry::leaf(PhysicalAddress::new(i << 21), LeafSize::Size2M);
        let raw = leaf.into_bits() | (attributes & ATTRIBUTE_BITS);
        table(&memory, PD).store(i as usize, PageEntry::from_bits(raw));
    }
    let leaf = PageEntry::leaf(PhysicalAddress::new(1 << 30), LeafSize::Size1G);
    table(&memory, PDPT).store(1, PageEntry::from_bits(leaf.into_bits() | (attributes & ATTRIBUTE_BITS)));
    memory
}

fn adopt<'a>(
    memory: &'a HostMemory,
    cache: &'a RecordingCache,
) -> PageTableEditor<&'a HostMemory, ScratchFrames, &'a RecordingCache> {
    let end = memory.range().end();
    let frames = ScratchFrames::new(PhysicalAddress::new(FIRST_FREE), end);
    let config = IdentityMapConfig::new().with_physical_address_bits(32);
    // SAFETY: the hierarchy was built above and nothing else edits it.
    unsafe { PageTableEditor::adopt(memory, frames, cache, config, PhysicalAddress::new(PML4)) }
        .unwrap()
}

/// The bits a 4 KiB leaf is expected to carry after demoting a large one.
fn expected_4k(large: u64, physical: u64) -> u64 {
    let pat = if large & PAT_LARGE_BIT != 0 { PAGE_SIZE_BIT } else { 0 };
    let kept = large & ATTRIBUTE_BITS & !PAT_LARGE_BIT;
    physical | kept | pat | 1
}

proptest! {
    #[test]
    fn split_2m_reproduces_every_sub_page(
        attributes in any::<u64>(),
        leaf in 0..4u64,
        index in 0..512u64,
        offset in 0..4096u64,
    ) {
        let memory = hand_built(attributes);
        let cache = RecordingCache::new();
        let editor = adopt(&memory, &cache);

        let address = VirtualAddress::new((leaf << 21) + index * 4096 + offset);
        let before = editor.translate(address).unwrap();
        prop_assert_eq!(before.size, LeafSize::Size2M);

        prop_assert_eq!(
            editor.split_large_page(address, PhysicalRange::empty()),
            Ok(LeafSize::Size4K)
        );
        let after = editor.translate(address).unwrap();
        prop_assert_eq!(after.size, LeafSize::Size4K);
        prop_assert_eq!(after.physical, before.physical);
        prop_assert_eq!(after.permissions, before.permissions);
        prop_assert_eq!(
            after.entry.into_bits(),
            expected_4k(before.entry.into_bits(), (leaf << 21) + index * 4096)
        );
        prop_assert_eq!(after.entry.pat(LeafSize::Size4K), before.entry.pat(LeafSize::Size2M));
    }

    #[test]
    fn split_1g_keeps_attributes_in_place(
        attributes in any::<u64>(),
        index in 0..512u64,
    ) {
        let memory = hand_built(attributes);
        let cache = RecordingCache::new();
        let editor = adopt(&memory, &cache);

        let address = VirtualAddress::new((1 << 30) + (index << 21) + 0x123);
        let before = editor.translate(address).unwrap();
        prop_assert_eq!(
            editor.split_large_page(address, PhysicalRange::empty()),
            Ok(LeafSize::Size2M)
        );
        let after = editor.translate(address).unwrap();
        prop_assert_eq!(after.size, LeafSize::Size2M);
        prop_assert_eq!(after.physical, before.physical);
        prop_assert_eq!(after.permissions, before.permissions);

        prop_assert_eq!(
            after.entry.into_bits() & !ADDRESS_MASK_2M,
            before.entry.into_bits() & !ADDRESS_MASK_2M
        );
    }

    #[test]
    fn toggling_restores_the_entry_bit_for_bit(
        attributes in any::<u64>(),
        pages in proptest::collection::btree_set(0..1024u64, 1..16),
    ) {
        let memory = hand_built(attributes);
        let cache = RecordingCache::new();
        let editor = adopt(&memory, &cache);
        let range = VirtualRange::new(VirtualAddress::zero(), 4 << 20).unwrap();
        prop_assert_eq!(editor.ensure_fine_grained(range, PhysicalRange::empty()), Ok(2));

        let addresses: Vec<_> = pages.iter().map(|p| VirtualAddress::new(p * 4096)).collect();
        let before: Vec<_> = addresses.iter().map(|&a| editor.translate(a).unwrap()).collect();

        for &address in &addresses {
            editor.disable_page(address).unwrap();
            prop_assert!(editor.translate(address).is_err());
        }
        prop_assert_eq!(editor.disabled_count(), addresses.len());
        for &address in addresses.iter().rev() {
            editor.enable_page(address).unwrap();
        }
        for (&address, old) in addresses.iter().zip(&before) {
            prop_assert_eq!(&editor.translate(address).unwrap(), old);
        }
        prop_assert_eq!(cache.page_invalidations(), 2 * addresses.len());
    }
}
