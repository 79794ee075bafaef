use crate::arena::TableOrigin;
use crate::entry::{PageEntry, Permissions};
use crate::error::PagingError;
use crate::frames::{FrameSource, claim_outside};
use crate::hierarchy::{Hierarchy, Slot, SlotKind, fresh_table};
use crate::identity::IdentityMapConfig;
use crate::mapper::PhysMapper;
use crate::table::Level;
use crate::tlb::TranslationCache;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use firmware_addresses::{
    LeafSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K, VirtualAddress, VirtualPage,
    VirtualRange, align_up,
};
use firmware_sync::{RwSpinLock, SpinLock};
use log::{debug, info, warn};

/// Highest address 4-level paging can translate (exclusive).
const FOUR_LEVEL_END: u64 = 1 << 48;

/// Result of [`PageTableEditor::translate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Translation {
    pub physical: PhysicalAddress,
    pub size: LeafSize,
    pub permissions: Permissions,
    /// The leaf entry as currently stored.
    pub entry: PageEntry,
}

/// Editor for a live x86-64 4-level translation hierarchy.
///
/// Owns the hierarchy (as an arena of table blocks), the frame source for new
/// tables and the translation-cache hooks, plus the ledger of pages it
/// disabled.
///
/// Locking:
/// - structural edits (splits, root replacement) hold the hierarchy lock
///   exclusively;
/// - presence toggles hold it shared and swap single leaf entries
///   atomically, so toggles on different 4 KiB leaves run in parallel;
/// - the ledger has its own lock, taken after the hierarchy lock.
pub struct PageTableEditor<M, F, C> {
    mapper: M,
    frames: SpinLock<F>,
    cache: C,
    config: IdentityMapConfig,
    hierarchy: RwSpinLock<Hierarchy>,
    ledger: SpinLock<BTreeMap<VirtualPage<Size4K>, PageEntry>>,
}

impl<M: PhysMapper, F: FrameSource, C: TranslationCache> PageTableEditor<M, F, C> {
    /// Editor over a new, empty hierarchy (nothing mapped yet).
    ///
    /// # Errors
    /// [`PagingError::OutOfTableFrames`] if no frame for the root is available.
    pub fn new(
        mapper: M,
        mut frames: F,
        cache: C,
        config: IdentityMapConfig,
    ) -> Result<Self, PagingError> {
        let root = frames
            .allocate_frame()
            .ok_or(PagingError::OutOfTableFrames)?;
        if let Err(e) = fresh_table(&mapper, root) {
            frames.release_frame(root);
            return Err(e);
        }
        let hierarchy = Hierarchy::with_root(root, TableOrigin::Allocated, config.addressable_end());
        debug!("New empty hierarchy rooted at {root}");
        Ok(Self::assemble(mapper, frames, cache, config, hierarchy))
    }

    /// Editor over the hierarchy rooted at `root`, typically read from CR3.
    ///
    /// Every table reachable from the root is registered in the arena.
    ///
    /// # Safety
    /// `root` must be the physical address of a valid PML4 whose tables are
    /// reachable through `mapper` and not edited by anyone else afterwards.
    ///
    /// # Errors
    /// [`PagingError::ForeignTable`] if the mapper cannot reach a table.
    pub unsafe fn adopt(
        mapper: M,
        frames: F,
        cache: C,
        config: IdentityMapConfig,
        root: PhysicalAddress,
    ) -> Result<Self, PagingError> {
        let root_frame = root.page::<Size4K>();
        let mut hierarchy =
            Hierarchy::with_root(root_frame, TableOrigin::Adopted, config.addressable_end());
        hierarchy.adopt_children(&mapper, hierarchy.root, Level::Pml4)?;
        info!(
            "Adopted hierarchy at {root_frame}: {} tables, {} page tables",
            hierarchy.arena.len(),
            hierarchy.arena.count_at(Level::Pt)
        );
        Ok(Self::assemble(mapper, frames, cache, config, hierarchy))
    }

    fn assemble(mapper: M, frames: F, cache: C, config: IdentityMapConfig, hierarchy: Hierarchy) -> Self {
        Self {
            mapper,
            frames: SpinLock::new(frames),
            cache,
            config,
            hierarchy: RwSpinLock::new(hierarchy),
            ledger: SpinLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &IdentityMapConfig {
        &self.config
    }

    #[must_use]
    pub const fn cache(&self) -> &C {
        &self.cache
    }

    /// Physical address of the PML4, ready for CR3.
    #[must_use]
    pub fn root(&self) -> PhysicalAddress {
        self.hierarchy.read().root_frame.base()
    }

    /// Number of table blocks in the arena.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.hierarchy.read().arena.len()
    }

    /// Frames of every table block in the arena, root first.
    #[must_use]
    pub fn table_frames(&self) -> Vec<PhysicalPage<Size4K>> {
        let hierarchy = self.hierarchy.read();
        (0..hierarchy.arena.len())
            .filter_map(|i| hierarchy.arena.block_at(i).map(|b| b.frame))
            .collect()
    }

    /// Number of pages currently held disabled by this editor.
    #[must_use]
    pub fn disabled_count(&self) -> usize {
        self.ledger.lock().len()
    }

    #[must_use]
    pub fn is_disabled(&self, address: VirtualAddress) -> bool {
        self.ledger.lock().contains_key(&address.page::<Size4K>())
    }

    /// Run `f` with exclusive access to the frame source.
    pub fn with_frames<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        self.frames.with_lock(f)
    }

    fn check_address(hierarchy: &Hierarchy, address: VirtualAddress) -> Result<(), PagingError> {
        if !address.is_canonical() || address.as_u64() >= hierarchy.limit {
            warn!("Rejecting {address}: outside the addressable range");
            return Err(PagingError::AddressOutOfRange(address));
        }
        Ok(())
    }

    /// Make the 4 KiB page containing `address` not present.
    ///
    /// Clears `P`, `A` and `D`; every other bit stays. The prior entry value
    /// goes into the ledger so [`enable_page`](Self::enable_page) can restore
    /// it exactly.
    ///
    /// # Errors
    /// - [`PagingError::AddressOutOfRange`] for non-canonical or too-high addresses;
    /// - [`PagingError::AlreadyDisabled`] if this editor already disabled the page;
    /// - [`PagingError::NotMapped`] if no present leaf covers the address;
    /// - [`PagingError::NotFineGrained`] if the leaf is 2 MiB or 1 GiB.
    pub fn disable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        let page = address.page::<Size4K>();
        {
            let hierarchy = self.hierarchy.read();
            Self::check_address(&hierarchy, address)?;
            let mut ledger = self.ledger.lock();
            if ledger.contains_key(&page) {
                warn!("Page {page} is already disabled");
                return Err(PagingError::AlreadyDisabled(address));
            }

            let slot = hierarchy.walk(&self.mapper, address)?;
            match slot.kind {
                SlotKind::Absent => return Err(PagingError::NotMapped(address)),
                SlotKind::Leaf(size) if size.is_large() => {
                    return Err(PagingError::NotFineGrained { address, size });
                }
                SlotKind::Leaf(_) => {}
            }

            // The page walker may set A/D between our load and the swap.
            let mut prior = slot.entry;
            while let Err(seen) = slot.table.compare_exchange(slot.index, prior, prior.disabled()) {
                if !seen.present() {
                    return Err(PagingError::NotMapped(address));
                }
                prior = seen;
            }
            ledger.insert(page, prior);
        }
        self.cache.invalidate_page(page);
        debug!("Disabled page {page}");
        Ok(())
    }

    /// Restore the entry [`disable_page`](Self::disable_page) saved for `address`.
    ///
    /// # Errors
    /// - [`PagingError::NotDisabled`] if the page is not in the ledger;
    /// - [`PagingError::AddressOutOfRange`] as for `disable_page`.
    pub fn enable_page(&self, address: VirtualAddress) -> Result<(), PagingError> {
        let page = address.page::<Size4K>();
        {
            let hierarchy = self.hierarchy.read();
            Self::check_address(&hierarchy, address)?;
            let mut ledger = self.ledger.lock();
            let Some(&saved) = ledger.get(&page) else {
                warn!("Page {page} was never disabled");
                return Err(PagingError::NotDisabled(address));
            };

            let slot = hierarchy.walk(&self.mapper, address)?;
            if slot.level != Level::Pt || slot.kind != SlotKind::Absent {
                return Err(PagingError::NotMapped(address));
            }
            slot.table.store(slot.index, saved);
            ledger.remove(&page);
        }
        self.cache.invalidate_page(page);
        debug!("Enabled page {page}");
        Ok(())
    }

    /// Demote the large leaf covering `address` by one level.
    ///
    /// The new table comes from the frame source, skipping frames inside
    /// `reserved`. Returns the leaf size the address now resolves through.
    ///
    /// # Errors
    /// - [`PagingError::NotLargePage`] if the leaf is already 4 KiB;
    /// - [`PagingError::NotMapped`] if nothing is mapped there;
    /// - [`PagingError::OutOfTableFrames`] with the hierarchy untouched.
    pub fn split_large_page(
        &self,
        address: VirtualAddress,
        reserved: PhysicalRange,
    ) -> Result<LeafSize, PagingError> {
        let sub = {
            let mut hierarchy = self.hierarchy.write();
            Self::check_address(&hierarchy, address)?;
            let slot = hierarchy.walk(&self.mapper, address)?;
            match slot.kind {
                SlotKind::Absent => return Err(PagingError::NotMapped(address)),
                SlotKind::Leaf(LeafSize::Size4K) => return Err(PagingError::NotLargePage(address)),
                SlotKind::Leaf(_) => {}
            }
            let frame = self.claim(reserved)?;
            self.demote_with(&mut hierarchy, &slot, frame)?
        };
        self.cache.invalidate_all();
        debug!("Split leaf at {address} into {sub} leaves");
        Ok(sub)
    }

    /// Split every large leaf intersecting `range` down to 4 KiB.
    ///
    /// Returns the number of tables created. Frames for the complete
    /// demotion of one address (two for a 1 GiB leaf) are claimed before
    /// the first store.
    ///
    /// # Errors
    /// [`PagingError::OutOfTableFrames`] when the source runs dry; leaves
    /// split before that point stay split (their mappings are unchanged).
    pub fn ensure_fine_grained(
        &self,
        range: VirtualRange,
        reserved: PhysicalRange,
    ) -> Result<usize, PagingError> {
        if range.is_empty() {
            return Ok(0);
        }
        let mut created = 0;
        let result = {
            let mut hierarchy = self.hierarchy.write();
            self.split_range(&mut hierarchy, range, reserved, &mut created)
        };
        if created > 0 {
            self.cache.invalidate_all();
            debug!("Created {created} tables to make {range} fine-grained");
        }
        result.map(|()| created)
    }

    fn split_range(
        &self,
        hierarchy: &mut Hierarchy,
        range: VirtualRange,
        reserved: PhysicalRange,
        created: &mut usize,
    ) -> Result<(), PagingError> {
        Self::check_address(hierarchy, range.start())?;
        let last = VirtualAddress::new(range.end().as_u64() - 1);
        Self::check_address(hierarchy, last)?;

        let end = range.end().as_u64();
        let mut cursor = range.start().as_u64();
        while cursor < end {
            let address = VirtualAddress::new(cursor);
            let slot = hierarchy.walk(&self.mapper, address)?;
            if let SlotKind::Leaf(size) = slot.kind
                && size.is_large()
            {
                *created += self.demote_fully(hierarchy, &slot, size, reserved)?;
                continue;
            }
            // Everything under the current PT (or absent entry) is settled.
            let step = match slot.level {
                Level::Pt => Level::Pd.entry_coverage(),
                level => level.entry_coverage(),
            };
            match align_up(cursor + 1, step) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Demote a large leaf all the way to 4 KiB for the slot's address.
    fn demote_fully(
        &self,
        hierarchy: &mut Hierarchy,
        slot: &Slot<'_>,
        size: LeafSize,
        reserved: PhysicalRange,
    ) -> Result<usize, PagingError> {
        let first = self.claim(reserved)?;
        let second = if size == LeafSize::Size1G {
            match self.claim(reserved) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    self.release(first);
                    return Err(e);
                }
            }
        } else {
            None
        };

        if let Err(e) = self.demote_with(hierarchy, slot, first) {
            if let Some(frame) = second {
                self.release(frame);
            }
            return Err(e);
        }
        let Some(second) = second else {
            return Ok(1);
        };
        let inner = match hierarchy.walk(&self.mapper, slot.address) {
            Ok(inner) => inner,
            Err(e) => {
                self.release(second);
                return Err(e);
            }
        };
        self.demote_with(hierarchy, &inner, second)?;
        Ok(2)
    }

    fn demote_with(
        &self,
        hierarchy: &mut Hierarchy,
        slot: &Slot<'_>,
        frame: PhysicalPage<Size4K>,
    ) -> Result<LeafSize, PagingError> {
        hierarchy.demote(&self.mapper, slot, frame).inspect_err(|_| self.release(frame))
    }

    fn claim(&self, reserved: PhysicalRange) -> Result<PhysicalPage<Size4K>, PagingError> {
        self.frames
            .with_lock(|frames| claim_outside(frames, reserved))
            .ok_or_else(|| {
                warn!("No table frame available outside {reserved}");
                PagingError::OutOfTableFrames
            })
    }

    fn release(&self, frame: PhysicalPage<Size4K>) {
        self.frames.with_lock(|frames| frames.release_frame(frame));
    }

    /// Replace the hierarchy with a fresh identity map.
    ///
    /// Maps `[0, 2^physical_address_bits)` with 1 GiB or 2 MiB leaves, then
    /// every page of `stack` with 4 KiB leaves (no-execute if configured).
    /// No table frame is placed inside the stack. The previous hierarchy's
    /// frames are left alone since the CPU may still be using them, and the
    /// ledger starts empty. Returns the new root for CR3.
    ///
    /// # Errors
    /// - [`PagingError::AddressOutOfRange`] if the stack lies beyond 4-level reach;
    /// - [`PagingError::OutOfTableFrames`] with the current hierarchy untouched.
    pub fn build_identity_map(&self, stack: VirtualRange) -> Result<PhysicalAddress, PagingError> {
        if stack.end().as_u64() > FOUR_LEVEL_END {
            return Err(PagingError::AddressOutOfRange(stack.start()));
        }
        let reserved = stack.identity();
        let end = self.config.addressable_end();
        let leaf = if self.config.use_1g_pages() {
            LeafSize::Size1G
        } else {
            LeafSize::Size2M
        };

        let fresh = {
            let mut frames = self.frames.lock();
            let root = claim_outside(&mut *frames, reserved).ok_or(PagingError::OutOfTableFrames)?;
            if let Err(e) = fresh_table(&self.mapper, root) {
                frames.release_frame(root);
                return Err(e);
            }
            let limit = end.max(stack.end().as_u64());
            let mut fresh = Hierarchy::with_root(root, TableOrigin::Allocated, limit);
            if let Err(e) = self.populate(&mut fresh, &mut *frames, reserved, leaf, stack) {
                for frame in fresh.arena.allocated_frames() {
                    frames.release_frame(frame);
                }
                return Err(e);
            }
            fresh
        };

        let root = fresh.root_frame.base();
        let tables = fresh.arena.len();
        let previous = core::mem::replace(&mut *self.hierarchy.write(), fresh);
        let stale = {
            let mut ledger = self.ledger.lock();
            let n = ledger.len();
            ledger.clear();
            n
        };
        if stale > 0 {
            warn!("Dropped {stale} disabled pages of the replaced hierarchy");
        }
        info!(
            "Identity map of {} address bits with {leaf} leaves, stack {stack} in 4K leaves: {tables} tables at {root} (replaced {})",
            self.config.physical_address_bits(),
            previous.root_frame
        );
        Ok(root)
    }

    fn populate(
        &self,
        fresh: &mut Hierarchy,
        frames: &mut F,
        reserved: PhysicalRange,
        leaf: LeafSize,
        stack: VirtualRange,
    ) -> Result<(), PagingError> {
        let end = self.config.addressable_end();
        let mut base = 0;
        while base < end {
            let entry = PageEntry::leaf(PhysicalAddress::new(base), leaf);
            fresh.install_leaf(&self.mapper, frames, reserved, VirtualAddress::new(base), entry, leaf)?;
            base += leaf.bytes();
        }

        for page in stack.pages::<Size4K>() {
            self.map_stack_page(fresh, frames, reserved, page)?;
        }
        Ok(())
    }

    fn map_stack_page(
        &self,
        fresh: &mut Hierarchy,
        frames: &mut F,
        reserved: PhysicalRange,
        page: VirtualPage<Size4K>,
    ) -> Result<(), PagingError> {
        let address = page.base();
        loop {
            let slot = fresh.walk(&self.mapper, address)?;
            match slot.kind {
                SlotKind::Leaf(LeafSize::Size4K) => {
                    let entry = slot.entry.with_no_execute(self.config.nx_for_stack());
                    slot.table.store(slot.index, entry);
                    return Ok(());
                }
                SlotKind::Leaf(_) => {
                    let frame = claim_outside(frames, reserved).ok_or(PagingError::OutOfTableFrames)?;
                    if let Err(e) = fresh.demote(&self.mapper, &slot, frame) {
                        frames.release_frame(frame);
                        return Err(e);
                    }
                }
                SlotKind::Absent => {
                    let entry = PageEntry::leaf(page.identity().base(), LeafSize::Size4K);
                    fresh.install_leaf(&self.mapper, frames, reserved, address, entry, LeafSize::Size4K)?;
                }
            }
        }
    }

    /// Invalidate every cached translation on all execution contexts.
    pub fn flush_translation_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Resolve `address` to its physical address, leaf size and effective rights.
    ///
    /// # Errors
    /// [`PagingError::NotMapped`] if the walk ends at a not-present entry.
    pub fn translate(&self, address: VirtualAddress) -> Result<Translation, PagingError> {
        let hierarchy = self.hierarchy.read();
        let slot = hierarchy.walk(&self.mapper, address)?;
        let SlotKind::Leaf(size) = slot.kind else {
            return Err(PagingError::NotMapped(address));
        };
        let offset = address.as_u64() & (size.bytes() - 1);
        Ok(Translation {
            physical: PhysicalAddress::new(slot.entry.leaf_address(size).as_u64() | offset),
            size,
            permissions: slot.permissions,
            entry: slot.entry,
        })
    }

    /// Whether the CPU translates through this editor's root.
    ///
    /// Contexts that cannot read the active root (host harnesses) count as
    /// owning it.
    #[must_use]
    pub fn owns_active_root(&self) -> bool {
        let root = self.root();
        self.cache.active_root().is_none_or(|active| active == root)
    }

    /// Load CR3 with this editor's root.
    ///
    /// # Safety
    /// The hierarchy must map all code, data and stack in use, and the
    /// caller must run at CPL 0.
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn activate(&self) {
        use firmware_registers::{Cr3, LoadRegisterUnsafe, StoreRegisterUnsafe};
        let root = self.root();
        unsafe {
            Cr3::load_unsafe().with_pml4_phys(root).store_unsafe();
        }
        info!("Activated hierarchy at {root}");
    }
}

impl<M, F, C> core::fmt::Debug for PageTableEditor<M, F, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEditor")
            .field("config", &self.config)
            .field("hierarchy", &self.hierarchy)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
