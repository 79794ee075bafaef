use firmware_addresses::{PhysicalAddress, Size4K, VirtualAddress, VirtualRange};
use firmware_paging::host::{HostMemory, RecordingCache, ScratchFrames};
use firmware_paging::{IdentityMapConfig, PageTableEditor, PagingError, Translation, Unsupported};
use firmware_special_pool::{
    BulkAllocator, DataAlignment, GuardPlacement, MemoryType, MemoryTypeMask, PoolConfig,
    PoolError, PoolStats, SpecialPool,
};
use proptest::prelude::*;

type HostEditor<'a> = PageTableEditor<&'a HostMemory, ScratchFrames, &'a RecordingCache>;

const TABLES: PhysicalAddress = PhysicalAddress::new(0x10_0000);
const POOL_BASE: u64 = 0x4000_0000;

/// First-fit page runs over a synthetic physical window.
#[derive(Debug)]
struct TestPages {
    next: u64,
    end: u64,
    free: Vec<(u64, u64)>,
    outstanding: u64,
    types: Vec<MemoryType>,
}

impl TestPages {
    fn new(base: u64, pages: u64) -> Self {
        Self {
            next: base,
            end: base + pages * 0x1000,
            free: Vec::new(),
            outstanding: 0,
            types: Vec::new(),
        }
    }
}

impl BulkAllocator for TestPages {
    fn allocate_pages(&mut self, memory_type: MemoryType, count: u64) -> Option<PhysicalAddress> {
        let base = if let Some(i) = self.free.iter().position(|&(_, n)| n >= count) {
            let (base, n) = self.free[i];
            if n == count {
                self.free.remove(i);
            } else {
                self.free[i] = (base + count * 0x1000, n - count);
            }
            base
        } else {
            let bytes = count.checked_mul(0x1000)?;
            if self.next.checked_add(bytes)? > self.end {
                return None;
            }
            let base = self.next;
            self.next += bytes;
            base
        };
        self.outstanding += count;
        self.types.push(memory_type);
        Some(PhysicalAddress::new(base))
    }

    fn free_pages(&mut self, base: PhysicalAddress, count: u64) {
        self.outstanding -= count;
        self.free.push((base.as_u64(), count));
        self.free.sort_unstable();
    }
}

fn va(address: u64) -> VirtualAddress {
    VirtualAddress::new(address)
}

fn pool_range() -> VirtualRange {
    VirtualRange::new(va(POOL_BASE), 0x20_0000).unwrap()
}

fn editor<'a>(memory: &'a HostMemory, cache: &'a RecordingCache) -> HostEditor<'a> {
    let config = IdentityMapConfig::new().with_physical_address_bits(32);
    let editor = PageTableEditor::new(memory, memory.frames(), cache, config).unwrap();
    let stack = VirtualRange::new(va(0x8_0000), 0x4000).unwrap();
    editor.build_identity_map(stack).unwrap();
    editor
}

fn pool<'e, 'a>(editor: &'e HostEditor<'a>, config: PoolConfig) -> SpecialPool<&'e HostEditor<'a>, TestPages> {
    let pool = SpecialPool::new(editor, TestPages::new(POOL_BASE, 64), config.with_range(pool_range()));
    pool.prepare().unwrap();
    pool
}

fn snapshot(editor: &HostEditor<'_>, range: VirtualRange) -> Vec<Result<Translation, PagingError>> {
    range.pages::<Size4K>().map(|p| editor.translate(p.base())).collect()
}

#[test]
fn one_byte_gets_one_page_between_two_guards() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    let address = pool.allocate(1).unwrap();
    let record = pool.lookup(address).unwrap();
    assert_eq!(record.backing_pages, 3);
    assert_eq!(record.memory_type, MemoryType::BOOT_SERVICES_DATA);
    assert_eq!(address, record.data.start());
    assert_eq!(record.data.len(), 0x1000);

    let leading = record.leading_guard.unwrap();
    let trailing = record.trailing_guard.unwrap();
    assert_eq!(leading.checked_add(2), Some(trailing));
    assert!(editor.translate(leading.base()).is_err());
    assert!(editor.translate(trailing.base()).is_err());
    assert_eq!(editor.translate(address).unwrap().physical, address.identity());
    assert!(editor.translate(va(address.as_u64() + 0xFFF)).is_ok());
    assert!(editor.translate(va(address.as_u64() + 0x1000)).is_err());
    assert_eq!(editor.disabled_count(), 2);
}

#[test]
fn free_restores_the_region_and_returns_the_pages() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    let region = VirtualRange::new(va(POOL_BASE), 8 * 0x1000).unwrap();
    let before = snapshot(&editor, region);

    let address = pool.allocate(0x1800).unwrap();
    assert_eq!(pool.lookup(address).unwrap().backing_pages, 4);
    pool.free(address).unwrap();

    assert_eq!(snapshot(&editor, region), before);
    assert_eq!(editor.disabled_count(), 0);
    assert_eq!(pool.with_bulk(|b| b.outstanding), 0);
    assert_eq!(
        pool.stats(),
        PoolStats {
            live: 0,
            allocations: 1,
            frees: 1,
            quarantined: 0
        }
    );

    // The same run comes back for the next request of that size.
    assert_eq!(pool.allocate(0x1800).unwrap(), address);
}

#[test]
fn double_free_is_rejected_without_side_effects() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    let a = pool.allocate(64).unwrap();
    let b = pool.allocate(64).unwrap();
    let b_record = pool.lookup(b).unwrap();
    pool.free(a).unwrap();

    let disabled = editor.disabled_count();
    assert_eq!(pool.free(a), Err(PoolError::InvalidParameter));
    assert_eq!(pool.free(va(b.as_u64() + 8)), Err(PoolError::InvalidParameter));
    assert_eq!(pool.free(va(0x1234_5000)), Err(PoolError::InvalidParameter));
    assert_eq!(editor.disabled_count(), disabled);
    for guard in b_record.guards() {
        assert!(editor.is_disabled(guard.base()));
    }
    assert_eq!(pool.stats().frees, 1);
}

#[test]
fn tail_alignment_puts_the_end_against_the_guard() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new().with_alignment(DataAlignment::Tail));

    let address = pool.allocate(13).unwrap();
    let record = pool.lookup(address).unwrap();
    let end = address.as_u64() + 16;
    assert_eq!(va(end), record.trailing_guard.unwrap().base());
    assert!(editor.translate(va(end - 1)).is_ok());
    assert!(editor.translate(va(end)).is_err());
    pool.free(address).unwrap();
}

#[test]
fn single_guard_placements() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new().with_guards(GuardPlacement::Leading));

    let address = pool.allocate(0x1000).unwrap();
    let record = pool.lookup(address).unwrap();
    assert_eq!(record.backing_pages, 2);
    assert_eq!(record.trailing_guard, None);
    assert!(editor.translate(va(address.as_u64() - 1)).is_err());
    assert_eq!(editor.disabled_count(), 1);
}

#[test]
fn invalid_sizes() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    assert_eq!(pool.allocate(0), Err(PoolError::InvalidParameter));
    assert_eq!(pool.allocate(u64::MAX), Err(PoolError::InvalidParameter));
    assert_eq!(pool.with_bulk(|b| b.outstanding), 0);
    assert_eq!(pool.stats(), PoolStats::default());
}

#[test]
fn bulk_exhaustion_is_out_of_resources() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    assert_eq!(pool.allocate(63 * 0x1000), Err(PoolError::OutOfResources));
    assert_eq!(editor.disabled_count(), 0);
    assert!(pool.allocate(62 * 0x1000).is_ok());
}

#[test]
fn table_exhaustion_rolls_back() {
    // Just enough frames for the identity map itself.
    let memory = HostMemory::new(TABLES, 8);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = SpecialPool::new(&editor, TestPages::new(POOL_BASE, 64), PoolConfig::new());

    assert_eq!(pool.allocate(100), Err(PoolError::OutOfResources));
    assert_eq!(pool.with_bulk(|b| b.outstanding), 0);
    assert_eq!(editor.disabled_count(), 0);
    assert_eq!(pool.stats().live, 0);
    assert_eq!(pool.prepare(), Err(PoolError::OutOfResources));
}

#[test]
fn allocation_splits_on_demand() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = SpecialPool::new(&editor, TestPages::new(POOL_BASE, 64), PoolConfig::new());

    let tables = editor.table_count();
    let address = pool.allocate(10).unwrap();
    assert_eq!(editor.table_count(), tables + 1);
    pool.free(address).unwrap();
}

#[test]
fn inactive_tables_are_refused() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    cache.set_active_root(Some(PhysicalAddress::new(0x7000)));
    assert_eq!(pool.allocate(16), Err(PoolError::Inactive));
    cache.set_active_root(Some(editor.root()));
    assert!(pool.allocate(16).is_ok());
}

#[test]
fn unsupported_platform_touches_nothing() {
    let pool = SpecialPool::new(Unsupported, TestPages::new(POOL_BASE, 64), PoolConfig::new());
    assert_eq!(pool.prepare(), Err(PoolError::Unsupported));
    assert_eq!(pool.allocate(16), Err(PoolError::Unsupported));
    assert_eq!(pool.free(va(POOL_BASE)), Err(PoolError::Unsupported));
    assert_eq!(pool.with_bulk(|b| (b.outstanding, b.next)), (0, POOL_BASE));
}

#[test]
fn poisoned_frees_go_through_the_quarantine() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let config = PoolConfig::new().with_poison_freed(true).with_quarantine_depth(1);
    let pool = pool(&editor, config);

    let a = pool.allocate(0x2000).unwrap();
    let b = pool.allocate(8).unwrap();
    let a_data = pool.lookup(a).unwrap().data;

    pool.free(a).unwrap();
    assert!(editor.translate(a).is_err());
    assert!(editor.translate(va(a.as_u64() + 0x1000)).is_err());
    assert_eq!(pool.stats().quarantined, 1);
    assert_eq!(pool.with_bulk(|b| b.outstanding), 7);
    assert_eq!(pool.free(a), Err(PoolError::InvalidParameter));

    pool.free(b).unwrap();
    assert_eq!(pool.stats().quarantined, 1);
    for page in a_data.pages::<Size4K>() {
        assert!(editor.translate(page.base()).is_ok());
    }
    assert!(editor.translate(b).is_err());

    assert_eq!(pool.drain_quarantine(), 1);
    assert!(editor.translate(b).is_ok());
    assert_eq!(editor.disabled_count(), 0);
    assert_eq!(pool.with_bulk(|b| b.outstanding), 0);
}

#[test]
fn null_page_trap_needs_a_range_at_zero() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);

    let elsewhere = SpecialPool::new(
        &editor,
        TestPages::new(POOL_BASE, 4),
        PoolConfig::new().with_range(pool_range()).with_trap_null_page(true),
    );
    assert_eq!(elsewhere.prepare(), Ok(1));
    assert!(editor.translate(VirtualAddress::zero()).is_ok());

    let at_zero = SpecialPool::new(
        &editor,
        TestPages::new(POOL_BASE, 4),
        PoolConfig::new()
            .with_range(VirtualRange::new(VirtualAddress::zero(), 0x1000).unwrap())
            .with_trap_null_page(true),
    );
    // The first 2 MiB were split for the stack already.
    assert_eq!(at_zero.prepare(), Ok(0));
    assert!(editor.translate(VirtualAddress::zero()).is_err());
    assert!(editor.translate(va(0x1000)).is_ok());
}

#[test]
fn memory_type_routing() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let mask = MemoryTypeMask::empty()
        .with(MemoryType::LOADER_DATA)
        .with(MemoryType::BOOT_SERVICES_DATA);
    let pool = pool(&editor, PoolConfig::new().with_memory_types(mask));

    assert!(pool.monitors(MemoryType::LOADER_DATA));
    assert!(!pool.monitors(MemoryType::RUNTIME_SERVICES_DATA));
    let address = pool.allocate_typed(MemoryType::LOADER_DATA, 32).unwrap();
    assert_eq!(pool.lookup(address).unwrap().memory_type, MemoryType::LOADER_DATA);
    assert!(pool.owns(address));
    pool.free(address).unwrap();
    assert!(!pool.owns(address));
}

#[test]
fn backing_pages_carry_the_requested_type() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let mask = MemoryTypeMask::empty()
        .with(MemoryType::RUNTIME_SERVICES_DATA)
        .with(MemoryType::BOOT_SERVICES_DATA);
    let pool = pool(&editor, PoolConfig::new().with_memory_types(mask));

    let runtime = pool.allocate_typed(MemoryType::RUNTIME_SERVICES_DATA, 48).unwrap();
    let boot = pool.allocate(48).unwrap();
    assert_eq!(
        pool.with_bulk(|b| b.types.clone()),
        [MemoryType::RUNTIME_SERVICES_DATA, MemoryType::BOOT_SERVICES_DATA]
    );
    pool.free(runtime).unwrap();
    pool.free(boot).unwrap();
}

#[test]
fn failed_free_is_not_counted() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = pool(&editor, PoolConfig::new());

    let address = pool.allocate(64).unwrap();
    let leading = pool.lookup(address).unwrap().leading_guard.unwrap();
    editor.enable_page(leading.base()).unwrap();

    assert_eq!(
        pool.free(address),
        Err(PoolError::Paging(PagingError::NotDisabled(leading.base())))
    );
    let stats = pool.stats();
    assert_eq!((stats.live, stats.allocations, stats.frees), (0, 1, 0));
    assert_eq!(editor.disabled_count(), 0);
}

#[test]
fn concurrent_allocations() {
    let memory = HostMemory::new(TABLES, 64);
    let cache = RecordingCache::new();
    let editor = editor(&memory, &cache);
    let pool = SpecialPool::new(
        &editor,
        TestPages::new(POOL_BASE, 512),
        PoolConfig::new().with_range(pool_range()),
    );
    pool.prepare().unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for size in 1..=32u64 {
                    let address = pool.allocate(size * 100).unwrap();
                    pool.free(address).unwrap();
                }
            });
        }
    });
    let stats = pool.stats();
    assert_eq!((stats.live, stats.allocations, stats.frees), (0, 128, 128));
    assert_eq!(editor.disabled_count(), 0);
    assert_eq!(pool.with_bulk(|b| b.outstanding), 0);
}

proptest! {
    #[test]
    fn allocate_then_free_restores_everything(
        sizes in proptest::collection::vec(1..0x3000u64, 1..12),
        order in any::<proptest::sample::Index>(),
        tail in any::<bool>(),
    ) {
        let memory = HostMemory::new(TABLES, 64);
        let cache = RecordingCache::new();
        let editor = editor(&memory, &cache);
        let alignment = if tail { DataAlignment::Tail } else { DataAlignment::Head };
        let pool = pool(&editor, PoolConfig::new().with_alignment(alignment));
        let region = VirtualRange::new(va(POOL_BASE), 64 * 0x1000).unwrap();
        let before = snapshot(&editor, region);

        let mut live: Vec<_> = sizes.iter().map(|&size| pool.allocate(size).unwrap()).collect();
        for (&address, &size) in live.iter().zip(&sizes) {
            let record = pool.lookup(address).unwrap();
            prop_assert!(record.data.contains(address));
            prop_assert!(address.as_u64() + size <= record.data.end().as_u64());
            for guard in record.guards() {
                prop_assert!(editor.translate(guard.base()).is_err());
            }
            for page in record.data.pages::<Size4K>() {
                prop_assert!(editor.translate(page.base()).is_ok());
            }
        }
        prop_assert_eq!(editor.disabled_count(), 2 * sizes.len());

        while !live.is_empty() {
            let address = live.swap_remove(order.index(live.len()));
            pool.free(address).unwrap();
        }
        prop_assert_eq!(snapshot(&editor, region), before);
        prop_assert_eq!(editor.disabled_count(), 0);
        prop_assert_eq!(pool.with_bulk(|b| b.outstanding), 0);
    }
}
