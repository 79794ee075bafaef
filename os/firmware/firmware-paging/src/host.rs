//! In-memory stand-ins for physical memory, table frames and the TLB.
//!
//! Lets the editor run unmodified on a development host: tables live in
//! ordinary 4 KiB aligned heap blocks that pretend to sit at a synthetic
//! physical base address.

use crate::frames::FrameSource;
use crate::mapper::PhysMapper;
use crate::table::PageTable;
use crate::tlb::TranslationCache;
use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use firmware_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K, VirtualPage,
};
use firmware_sync::SpinLock;

/// Host-backed "physical memory" for page tables.
pub struct HostMemory {
    base: u64,
    blocks: Box<[PageTable]>,
}

impl HostMemory {
    /// `frames` zeroed 4 KiB blocks starting at the synthetic address `base`.
    #[must_use]
    pub fn new(base: PhysicalAddress, frames: usize) -> Self {
        Self {
            base: base.page::<Size4K>().base().as_u64(),
            blocks: (0..frames).map(|_| PageTable::new()).collect(),
        }
    }

    /// The synthetic physical range backed by this memory.
    #[must_use]
    pub fn range(&self) -> PhysicalRange {
        let len = self.blocks.len() as u64 * Size4K::SIZE;
        PhysicalRange::new(PhysicalAddress::new(self.base), len).unwrap_or_else(PhysicalRange::empty)
    }

    /// A frame source handing out every block in address order.
    #[must_use]
    pub fn frames(&self) -> ScratchFrames {
        let range = self.range();
        ScratchFrames::new(range.start(), range.end())
    }
}

impl PhysMapper for HostMemory {
    unsafe fn table<'a>(&self, frame: PhysicalPage<Size4K>) -> Option<&'a PageTable> {
        let offset = frame.base().as_u64().checked_sub(self.base)?;
        let index = usize::try_from(offset / Size4K::SIZE).ok()?;
        let table = self.blocks.get(index)?;
        // SAFETY: the blocks live as long as `self`; the caller keeps `self`
        // alive for `'a` and only uses atomic accesses.
        Some(unsafe { &*core::ptr::from_ref(table) })
    }
}

/// Deterministic frame source: ascending 4 KiB steps, lowest released frame first.
#[derive(Debug, Clone)]
pub struct ScratchFrames {
    next: u64,
    end: u64,
    released: BTreeSet<PhysicalPage<Size4K>>,
    outstanding: usize,
}

impl ScratchFrames {
    #[must_use]
    pub fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self {
            next: start.page::<Size4K>().base().as_u64(),
            end: end.as_u64(),
            released: BTreeSet::new(),
            outstanding: 0,
        }
    }

    /// Frames handed out and not released.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Frames still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.released.len() as u64 + self.end.saturating_sub(self.next) / Size4K::SIZE
    }
}

impl FrameSource for ScratchFrames {
    fn allocate_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        let frame = if let Some(frame) = self.released.pop_first() {
            frame
        } else {
            if self.next.checked_add(Size4K::SIZE)? > self.end {
                return None;
            }
            let frame = PhysicalAddress::new(self.next).page::<Size4K>();
            self.next += Size4K::SIZE;
            frame
        };
        self.outstanding += 1;
        Some(frame)
    }

    fn release_frame(&mut self, frame: PhysicalPage<Size4K>) {
        if self.released.insert(frame) {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
    }
}

/// Translation cache that only counts what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingCache {
    pages: SpinLock<Vec<VirtualPage<Size4K>>>,
    full: AtomicUsize,
    active_root: AtomicU64,
}

impl RecordingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the CPU translates through `root` (`None`: unknown).
    pub fn set_active_root(&self, root: Option<PhysicalAddress>) {
        self.active_root
            .store(root.map_or(0, PhysicalAddress::as_u64), Ordering::Relaxed);
    }

    /// Pages passed to `invalidate_page`, in call order.
    #[must_use]
    pub fn invalidated_pages(&self) -> Vec<VirtualPage<Size4K>> {
        self.pages.lock().clone()
    }

    #[must_use]
    pub fn page_invalidations(&self) -> usize {
        self.pages.lock().len()
    }

    #[must_use]
    pub fn full_flushes(&self) -> usize {
        self.full.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.pages.lock().clear();
        self.full.store(0, Ordering::Relaxed);
    }
}

impl TranslationCache for RecordingCache {
    fn invalidate_page(&self, page: VirtualPage<Size4K>) {
        self.pages.lock().push(page);
    }

    fn invalidate_all(&self) {
        self.full.fetch_add(1, Ordering::Relaxed);
    }

    fn active_root(&self) -> Option<PhysicalAddress> {
        match self.active_root.load(Ordering::Relaxed) {
            0 => None,
            root => Some(PhysicalAddress::new(root)),
        }
    }
}
