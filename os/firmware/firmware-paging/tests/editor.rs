use firmware_addresses::{
    LeafSize, PhysicalAddress, PhysicalRange, Size4K, VirtualAddress, VirtualRange,
};
use firmware_paging::host::{HostMemory, RecordingCache, ScratchFrames};
use firmware_paging::{
    IdentityMapConfig, PageProtection, PageTableEditor, Paging, PagingCapability, PagingError,
    Unsupported,
};

type HostEditor<'a> = PageTableEditor<&'a HostMemory, ScratchFrames, &'a RecordingCache>;

const TABLES: PhysicalAddress = PhysicalAddress::new(0x10_0000);
const STACK: u64 = 0x8_0000;
const STACK_LEN: u64 = 0x4000;

fn stack() -> VirtualRange {
    VirtualRange::new(VirtualAddress::new(STACK), STACK_LEN).unwrap()
}

fn va(address: u64) -> VirtualAddress {
    VirtualAddress::new(address)
}

fn page_range(address: u64) -> VirtualRange {
    VirtualRange::new(va(address), 0x1000).unwrap()
}

fn config() -> IdentityMapConfig {
    IdentityMapConfig::new().with_physical_address_bits(32)
}

fn editor<'a>(
    memory: &'a HostMemory,
    cache: &'a RecordingCache,
    config: IdentityMapConfig,
) -> HostEditor<'a> {
    let editor = PageTableEditor::new(memory, memory.frames(), cache, config).unwrap();
    editor.build_identity_map(stack()).unwrap();
    cache.reset();
    editor
}

#[test]
fn identity_map_uses_large_leaves_and_4k_stack() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    // Root, one PDPT, four PDs and the page table under the stack.
    assert_eq!(editor.table_count(), 7);

    let t = editor.translate(va(0x1234_5678)).unwrap();
    assert_eq!(t.size, LeafSize::Size2M);
    assert_eq!(t.physical.as_u64(), 0x1234_5678);

    for page in stack().pages::<Size4K>() {
        let t = editor.translate(page.base()).unwrap();
        assert_eq!(t.size, LeafSize::Size4K);
        assert_eq!(t.physical, page.identity().base());
    }

    // The rest of the first 2 MiB still resolves after the split.
    let t = editor.translate(va(0x1F_F008)).unwrap();
    assert_eq!((t.size, t.physical.as_u64()), (LeafSize::Size4K, 0x1F_F008));

    assert!(matches!(
        editor.translate(va(0x1_0000_0000)),
        Err(PagingError::NotMapped(_))
    ));
}

#[test]
fn identity_map_with_1g_leaves() {
    let memory = HostMemory::new(TABLES, 16);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config().with_use_1g_pages(true));

    // Root, PDPT, then one PD and one PT to reach the stack.
    assert_eq!(editor.table_count(), 4);
    assert_eq!(editor.translate(va(0xC000_0000)).unwrap().size, LeafSize::Size1G);
    assert_eq!(editor.translate(va(0x20_0000)).unwrap().size, LeafSize::Size2M);
    assert_eq!(editor.translate(va(STACK)).unwrap().size, LeafSize::Size4K);
}

#[test]
fn stack_pages_are_no_execute_when_configured() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config().with_nx_for_stack(true));

    let t = editor.translate(va(STACK + 0x1000)).unwrap();
    assert!(!t.permissions.executable);
    assert!(t.permissions.writable);
    assert!(editor.translate(va(STACK + STACK_LEN)).unwrap().permissions.executable);
}

#[test]
fn table_frames_stay_out_of_the_stack() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = PageTableEditor::new(&memory, memory.frames(), &cache, config()).unwrap();

    // The stack overlaps the frames the source hands out next.
    let stack = VirtualRange::new(va(0x10_1000), 0x3000).unwrap();
    editor.build_identity_map(stack).unwrap();

    let reserved = stack.identity();
    let frames = editor.table_frames();
    assert_eq!(frames.len(), 7);
    assert!(frames.iter().all(|&frame| !reserved.overlaps_page(frame)));
    assert_eq!(editor.translate(va(0x10_2000)).unwrap().size, LeafSize::Size4K);

    // Rejected frames went back to the source.
    assert_eq!(editor.with_frames(|f| f.outstanding()), 8);
}

#[test]
fn disable_and_enable_restore_the_exact_entry() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    let page = va(STACK + 0x2000);
    let before = editor.translate(page).unwrap();

    editor.disable_page(page).unwrap();
    assert!(editor.is_disabled(page));
    assert_eq!(editor.disabled_count(), 1);
    assert!(matches!(editor.translate(page), Err(PagingError::NotMapped(_))));

    // Neighbours are unaffected.
    assert!(editor.translate(va(STACK + 0x1000)).is_ok());
    assert!(editor.translate(va(STACK + 0x3000)).is_ok());

    editor.enable_page(page).unwrap();
    assert_eq!(editor.translate(page).unwrap(), before);
    assert_eq!(editor.disabled_count(), 0);

    let expected = vec![page.page::<Size4K>(); 2];
    assert_eq!(cache.invalidated_pages(), expected);
    assert_eq!(cache.full_flushes(), 0);
}

#[test]
fn toggle_errors() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    let large = va(0x4000_0000);
    assert_eq!(
        editor.disable_page(large),
        Err(PagingError::NotFineGrained {
            address: large,
            size: LeafSize::Size2M
        })
    );
    assert_eq!(editor.enable_page(va(STACK)), Err(PagingError::NotDisabled(va(STACK))));

    editor.disable_page(va(STACK)).unwrap();
    assert_eq!(
        editor.disable_page(va(STACK + 0x10)),
        Err(PagingError::AlreadyDisabled(va(STACK + 0x10)))
    );

    let high = va(0x1_0000_0000);
    assert_eq!(editor.disable_page(high), Err(PagingError::AddressOutOfRange(high)));
    let non_canonical = va(0x0000_8000_0000_0000);
    assert_eq!(
        editor.disable_page(non_canonical),
        Err(PagingError::AddressOutOfRange(non_canonical))
    );
    assert_eq!(cache.page_invalidations(), 1);
}

#[test]
fn splitting_a_2m_leaf_preserves_every_translation() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    let base = 0x4020_0000;
    let before: Vec<_> = (0..512u64)
        .map(|i| editor.translate(va(base + i * 0x1000 + 0x10)).unwrap())
        .collect();

    let tables = editor.table_count();
    assert_eq!(
        editor.split_large_page(va(base + 0x5_5000), PhysicalRange::empty()),
        Ok(LeafSize::Size4K)
    );
    assert_eq!(editor.table_count(), tables + 1);
    assert_eq!(cache.full_flushes(), 1);

    for (i, old) in (0..512u64).zip(&before) {
        let new = editor.translate(va(base + i * 0x1000 + 0x10)).unwrap();
        assert_eq!(new.size, LeafSize::Size4K);
        assert_eq!(new.physical, old.physical);
        assert_eq!(new.permissions, old.permissions);
    }

    assert_eq!(
        editor.split_large_page(va(base), PhysicalRange::empty()),
        Err(PagingError::NotLargePage(va(base)))
    );
    assert_eq!(
        editor.split_large_page(va(0x1_0000_0000), PhysicalRange::empty()),
        Err(PagingError::AddressOutOfRange(va(0x1_0000_0000)))
    );
}

#[test]
fn fine_graining_a_1g_leaf_creates_two_tables() {
    let memory = HostMemory::new(TABLES, 16);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config().with_use_1g_pages(true));

    let target = page_range(0x8765_4000);
    assert_eq!(editor.ensure_fine_grained(target, PhysicalRange::empty()), Ok(2));
    assert_eq!(editor.translate(target.start()).unwrap().size, LeafSize::Size4K);
    assert_eq!(editor.translate(va(0x8000_0000)).unwrap().size, LeafSize::Size2M);
    assert_eq!(editor.translate(va(0x8000_0000)).unwrap().physical.as_u64(), 0x8000_0000);

    // Already fine: nothing to do, no flush.
    cache.reset();
    assert_eq!(editor.ensure_fine_grained(target, PhysicalRange::empty()), Ok(0));
    assert_eq!(cache.full_flushes(), 0);
}

#[test]
fn fine_graining_a_range_across_leaves() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    // Last page of one 2 MiB leaf plus the first of the next.
    let range = VirtualRange::new(va(0x5FF_F000), 0x2000).unwrap();
    assert_eq!(editor.ensure_fine_grained(range, PhysicalRange::empty()), Ok(2));
    assert_eq!(cache.full_flushes(), 1);
    for page in range.pages::<Size4K>() {
        editor.disable_page(page.base()).unwrap();
    }
    assert_eq!(editor.disabled_count(), 2);

    assert_eq!(
        editor.ensure_fine_grained(VirtualRange::empty(), PhysicalRange::empty()),
        Ok(0)
    );
}

#[test]
fn running_out_of_frames_leaves_the_hierarchy_untouched() {
    // One frame for the first root, then root, PDPT, four PDs and the stack PT.
    let memory = HostMemory::new(TABLES, 8);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());
    assert_eq!(editor.with_frames(|f| f.remaining()), 0);

    let tables = editor.table_count();
    assert_eq!(
        editor.split_large_page(va(0x4000_0000), PhysicalRange::empty()),
        Err(PagingError::OutOfTableFrames)
    );
    assert_eq!(
        editor.ensure_fine_grained(page_range(0x4000_0000), PhysicalRange::empty()),
        Err(PagingError::OutOfTableFrames)
    );
    assert_eq!(editor.table_count(), tables);
    assert_eq!(editor.translate(va(0x4000_0000)).unwrap().size, LeafSize::Size2M);
    assert_eq!(cache.full_flushes(), 0);
}

#[test]
fn a_1g_split_needs_both_frames_up_front() {
    // First root, then root, PDPT, PD and PT for the stack, plus one spare.
    let memory = HostMemory::new(TABLES, 6);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config().with_use_1g_pages(true));
    assert_eq!(editor.with_frames(|f| f.remaining()), 1);

    assert_eq!(
        editor.ensure_fine_grained(page_range(0x4000_0000), PhysicalRange::empty()),
        Err(PagingError::OutOfTableFrames)
    );
    assert_eq!(editor.translate(va(0x4000_0000)).unwrap().size, LeafSize::Size1G);
    assert_eq!(editor.with_frames(|f| f.remaining()), 1);

    // A single demotion still fits.
    assert_eq!(
        editor.split_large_page(va(0x4000_0000), PhysicalRange::empty()),
        Ok(LeafSize::Size2M)
    );
}

#[test]
fn build_identity_map_fails_cleanly_without_frames() {
    let memory = HostMemory::new(TABLES, 4);
    let cache = RecordingCache::new();
    let editor = PageTableEditor::new(&memory, memory.frames(), &cache, config()).unwrap();
    let root = editor.root();

    assert_eq!(editor.build_identity_map(stack()), Err(PagingError::OutOfTableFrames));
    assert_eq!(editor.root(), root);
    assert_eq!(editor.table_count(), 1);
    assert_eq!(editor.with_frames(|f| f.outstanding()), 1);
}

#[test]
fn stack_beyond_four_level_reach_is_rejected() {
    let memory = HostMemory::new(TABLES, 8);
    let cache = RecordingCache::new();
    let editor = PageTableEditor::new(&memory, memory.frames(), &cache, config()).unwrap();
    let stack = VirtualRange::new(va(0xFFFF_F000_0000), 0x2000_0000).unwrap();
    assert!(matches!(
        editor.build_identity_map(stack),
        Err(PagingError::AddressOutOfRange(_))
    ));
}

#[test]
fn rebuilding_drops_the_ledger() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    editor.disable_page(va(STACK)).unwrap();
    let old = editor.root();
    let new = editor.build_identity_map(stack()).unwrap();
    assert_ne!(old, new);
    assert_eq!(editor.disabled_count(), 0);
    assert!(editor.translate(va(STACK)).is_ok());
}

#[test]
fn adopting_an_existing_hierarchy() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let builder = editor(&memory, &cache, config());
    let root = builder.root();
    let tables = builder.table_count();
    let spare = HostMemory::new(PhysicalAddress::new(0x20_0000), 4);

    // SAFETY: `builder` is not used for edits after this point.
    let adopted = unsafe {
        PageTableEditor::adopt(&memory, spare.frames(), &cache, config(), root)
    }
    .unwrap();
    assert_eq!(adopted.table_count(), tables);
    assert_eq!(adopted.root(), root);
    assert_eq!(
        adopted.translate(va(0x3000_0000)).unwrap(),
        builder.translate(va(0x3000_0000)).unwrap()
    );

    adopted.disable_page(va(STACK)).unwrap();
    assert!(builder.translate(va(STACK)).is_err());
}

#[test]
fn owning_the_active_root() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());

    assert!(editor.owns_active_root());
    cache.set_active_root(Some(editor.root()));
    assert!(editor.owns_active_root());
    cache.set_active_root(Some(PhysicalAddress::new(0x7000)));
    assert!(!editor.owns_active_root());
}

#[test]
fn disjoint_toggles_run_concurrently() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache, config());
    let range = VirtualRange::new(va(0x4000_0000), 0x20_0000).unwrap();
    editor.ensure_fine_grained(range, PhysicalRange::empty()).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let editor = &editor;
            scope.spawn(move || {
                for i in 0..64u64 {
                    let page = va(0x4000_0000 + (worker * 64 + i) * 0x1000);
                    editor.disable_page(page).unwrap();
                    editor.enable_page(page).unwrap();
                    editor.disable_page(page).unwrap();
                }
            });
        }
    });
    assert_eq!(editor.disabled_count(), 256);
    assert_eq!(cache.page_invalidations(), 3 * 256);
}

#[test]
fn paging_selection() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();

    let paging = Paging::select(PagingCapability::FourLevel { no_execute: true }, || {
        PageTableEditor::new(&memory, memory.frames(), &cache, config())
    })
    .unwrap();
    assert!(paging.is_supported());
    paging.build_identity_map(stack()).unwrap();
    paging.disable_page(va(STACK)).unwrap();
    assert!(paging.editor().unwrap().is_disabled(va(STACK)));

    let missing = PagingCapability::from_registers(
        firmware_registers::Cr0::new(),
        firmware_registers::Cr4::new(),
        firmware_registers::Efer::new(),
    );
    let paging: Paging<HostEditor<'_>> =
        Paging::select(missing, || -> Result<_, PagingError> { unreachable!() }).unwrap();
    assert!(!paging.is_supported());
    assert_eq!(paging.disable_page(va(STACK)), Err(PagingError::Unsupported));
    assert_eq!(paging.flush_translation_cache(), Err(PagingError::Unsupported));
    assert!(!paging.owns_active_root());
    assert!(matches!(paging, Paging::Unsupported(Unsupported)));
}
