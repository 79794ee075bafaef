use crate::bulk::BulkAllocator;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::memory_type::MemoryType;
use crate::record::GuardedAllocation;
use alloc::collections::{BTreeMap, VecDeque};
use core::sync::atomic::{AtomicU64, Ordering};
use firmware_addresses::{PhysicalRange, Size4K, VirtualAddress, VirtualPage, VirtualRange};
use firmware_paging::{PageProtection, PagingError};
use firmware_sync::SpinLock;
use log::{debug, error, info, warn};

/// Counters reported by [`SpecialPool::stats`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Allocations currently handed out.
    pub live: usize,
    /// Successful allocations since creation.
    pub allocations: u64,
    /// Successful frees since creation.
    pub frees: u64,
    /// Freed allocations held poisoned in the quarantine.
    pub quarantined: usize,
}

/// Guard-page allocator: every allocation sits in its own page run, fenced
/// by not-present guard pages.
///
/// Backing pages come from a [`BulkAllocator`]; guards are toggled through
/// a [`PageProtection`] so that an out-of-bounds access faults on the
/// first byte past the allocation.
pub struct SpecialPool<P, B> {
    paging: P,
    bulk: SpinLock<B>,
    config: PoolConfig,
    records: SpinLock<BTreeMap<VirtualAddress, GuardedAllocation>>,
    quarantine: SpinLock<VecDeque<GuardedAllocation>>,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl<P: PageProtection, B: BulkAllocator> SpecialPool<P, B> {
    pub fn new(paging: P, bulk: B, config: PoolConfig) -> Self {
        Self {
            paging,
            bulk: SpinLock::new(bulk),
            config,
            records: SpinLock::new(BTreeMap::new()),
            quarantine: SpinLock::new(VecDeque::new()),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub const fn paging(&self) -> &P {
        &self.paging
    }

    /// Run `f` with exclusive access to the bulk allocator.
    pub fn with_bulk<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        self.bulk.with_lock(f)
    }

    /// Whether requests of `memory_type` belong to this pool.
    #[must_use]
    pub const fn monitors(&self, memory_type: MemoryType) -> bool {
        self.config.monitors(memory_type)
    }

    /// Make the configured range fine-grained and trap the null page if asked.
    ///
    /// Returns the number of page tables created. The null page trap only
    /// applies when the range starts at address 0; otherwise it is reported
    /// and ignored.
    ///
    /// # Errors
    /// [`PoolError::Unsupported`] without flat paging, [`PoolError::OutOfResources`]
    /// when the table frames run out, [`PoolError::Paging`] otherwise.
    pub fn prepare(&self) -> Result<usize, PoolError> {
        if !self.paging.is_supported() {
            return Err(PoolError::Unsupported);
        }
        let range = self.config.range();
        let mut created = self
            .paging
            .ensure_fine_grained(range, PhysicalRange::empty())
            .map_err(PoolError::from_paging)?;
        info!("Special-pool range {range} is fine-grained ({created} new tables)");

        if self.config.trap_null_page() {
            if range.start().as_u64() == 0 {
                let null = VirtualRange::new(VirtualAddress::zero(), 1).unwrap_or_else(VirtualRange::empty);
                created += self
                    .paging
                    .ensure_fine_grained(null, PhysicalRange::empty())
                    .map_err(PoolError::from_paging)?;
                self.paging
                    .disable_page(VirtualAddress::zero())
                    .map_err(PoolError::from_paging)?;
                info!("Trapping accesses to page 0");
            } else {
                error!(
                    "Invalid configuration: null page trap ignored, special-pool range starts at {}",
                    range.start()
                );
            }
        }
        Ok(created)
    }

    /// [`allocate_typed`](Self::allocate_typed) for boot-services data.
    ///
    /// # Errors
    /// As for `allocate_typed`.
    pub fn allocate(&self, size: u64) -> Result<VirtualAddress, PoolError> {
        self.allocate_typed(MemoryType::BOOT_SERVICES_DATA, size)
    }

    /// Allocate `size` bytes between guard pages.
    ///
    /// # Errors
    /// - [`PoolError::InvalidParameter`] for zero or overflowing sizes;
    /// - [`PoolError::Unsupported`] / [`PoolError::Inactive`] if guards cannot work;
    /// - [`PoolError::OutOfResources`] if pages or table frames run out.
    ///
    /// On error nothing stays allocated and no guard stays disabled.
    pub fn allocate_typed(&self, memory_type: MemoryType, size: u64) -> Result<VirtualAddress, PoolError> {
        if !self.paging.is_supported() {
            return Err(PoolError::Unsupported);
        }
        if !self.paging.owns_active_root() {
            warn!("Special-pool page tables are not active");
            return Err(PoolError::Inactive);
        }
        if size == 0 {
            warn!("Rejecting zero-sized {memory_type} allocation");
            return Err(PoolError::InvalidParameter);
        }
        let Some(pages) = GuardedAllocation::pages_for(&self.config, size) else {
            warn!("Rejecting {memory_type} allocation of {size} bytes: page count overflows");
            return Err(PoolError::InvalidParameter);
        };

        let backing = self.bulk.lock().allocate_pages(memory_type, pages).ok_or_else(|| {
            warn!("Bulk allocator has no run of {pages} pages of {memory_type}");
            PoolError::OutOfResources
        })?;
        let Some(record) = GuardedAllocation::layout(&self.config, memory_type, size, backing) else {
            self.bulk.lock().free_pages(backing, pages);
            return Err(PoolError::InvalidParameter);
        };
        self.arm(&record)?;

        self.records.lock().insert(record.address, record);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Allocated {size} bytes of {memory_type} at {} ({} pages at {})",
            record.address, record.backing_pages, record.backing
        );
        Ok(record.address)
    }

    /// Make the run fine-grained and disable its guards. On error the run
    /// is back with the bulk allocator (unless a guard could not be restored).
    fn arm(&self, record: &GuardedAllocation) -> Result<(), PoolError> {
        if let Err(e) = self.paging.ensure_fine_grained(record.backing_range(), PhysicalRange::empty()) {
            warn!("Cannot split {}: {e}", record.backing_range());
            self.return_backing(record);
            return Err(PoolError::from_paging(e));
        }
        for (armed, guard) in record.guards().enumerate() {
            if let Err(e) = self.paging.disable_page(guard.base()) {
                warn!("Cannot disable guard {guard}: {e}");
                match self.restore(record.guards().take(armed)) {
                    Ok(()) => self.return_backing(record),
                    Err(_) => Self::leak(record),
                }
                return Err(PoolError::from_paging(e));
            }
        }
        Ok(())
    }

    /// Release the allocation returned at `address`.
    ///
    /// # Errors
    /// - [`PoolError::InvalidParameter`] if `address` is not a live allocation
    ///   (double or wild free); nothing is touched;
    /// - [`PoolError::Unsupported`] without flat paging.
    pub fn free(&self, address: VirtualAddress) -> Result<(), PoolError> {
        if !self.paging.is_supported() {
            return Err(PoolError::Unsupported);
        }
        let Some(record) = self.records.lock().remove(&address) else {
            warn!("Free of {address}: not a live special-pool allocation");
            return Err(PoolError::InvalidParameter);
        };
        if let Err(e) = self.restore(record.guards()) {
            Self::leak(&record);
            return Err(PoolError::from_paging(e));
        }
        self.frees.fetch_add(1, Ordering::Relaxed);
        if self.config.poison_freed() {
            self.poison(record);
        } else {
            self.return_backing(&record);
        }
        debug!("Freed {} bytes at {address}", record.size);
        Ok(())
    }

    /// The live allocation returned at `address`.
    #[must_use]
    pub fn lookup(&self, address: VirtualAddress) -> Option<GuardedAllocation> {
        self.records.lock().get(&address).copied()
    }

    /// Whether `address` was returned by this pool and not yet freed.
    #[must_use]
    pub fn owns(&self, address: VirtualAddress) -> bool {
        self.records.lock().contains_key(&address)
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.records.lock().len(),
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            quarantined: self.quarantine.lock().len(),
        }
    }

    /// Re-enable and release every quarantined allocation; returns how many.
    pub fn drain_quarantine(&self) -> usize {
        let drained: VecDeque<_> = core::mem::take(&mut *self.quarantine.lock());
        let count = drained.len();
        for record in drained {
            self.release_quarantined(&record);
        }
        count
    }

    fn poison(&self, record: GuardedAllocation) {
        for (poisoned, page) in record.data.pages::<Size4K>().enumerate() {
            if let Err(e) = self.paging.disable_page(page.base()) {
                warn!("Cannot poison {page}: {e}");
                match self.restore(record.data.pages::<Size4K>().take(poisoned)) {
                    Ok(()) => self.return_backing(&record),
                    Err(_) => Self::leak(&record),
                }
                return;
            }
        }

        let evicted = {
            let mut quarantine = self.quarantine.lock();
            quarantine.push_back(record);
            if quarantine.len() > self.config.quarantine_depth() {
                quarantine.pop_front()
            } else {
                None
            }
        };
        if let Some(oldest) = evicted {
            self.release_quarantined(&oldest);
        }
    }

    fn release_quarantined(&self, record: &GuardedAllocation) {
        match self.restore(record.data.pages::<Size4K>()) {
            Ok(()) => self.return_backing(record),
            Err(_) => Self::leak(record),
        }
    }

    /// Enable every page in `pages`, reporting the first failure.
    fn restore(&self, pages: impl IntoIterator<Item = VirtualPage<Size4K>>) -> Result<(), PagingError> {
        let mut result = Ok(());
        for page in pages {
            if let Err(e) = self.paging.enable_page(page.base()) {
                error!("Cannot re-enable {page}: {e}");
                result = result.and(Err(e));
            }
        }
        result
    }

    fn return_backing(&self, record: &GuardedAllocation) {
        self.bulk.lock().free_pages(record.backing, record.backing_pages);
    }

    fn leak(record: &GuardedAllocation) {
        error!(
            "Leaking {} pages at {}: some pages stay disabled",
            record.backing_pages, record.backing
        );
    }
}

impl<P, B> core::fmt::Debug for SpecialPool<P, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpecialPool")
            .field("config", &self.config)
            .field("records", &self.records)
            .field("allocations", &self.allocations)
            .field("frees", &self.frees)
            .finish_non_exhaustive()
    }
}
