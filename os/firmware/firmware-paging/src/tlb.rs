//! Translation-cache coherence after page table edits.

use firmware_addresses::{PhysicalAddress, Size4K, VirtualPage};

/// Keeps cached translations in line with the page tables.
///
/// Every presence toggle calls one of these before it returns. The methods
/// take `&self` because toggles on disjoint pages run concurrently.
pub trait TranslationCache {
    /// Drop any cached translation of `page` on every execution context.
    fn invalidate_page(&self, page: VirtualPage<Size4K>);

    /// Drop all cached translations on every execution context.
    fn invalidate_all(&self);

    /// Root the CPU is currently translating through, when it can be read.
    fn active_root(&self) -> Option<PhysicalAddress> {
        None
    }
}

impl<T: TranslationCache + ?Sized> TranslationCache for &T {
    fn invalidate_page(&self, page: VirtualPage<Size4K>) {
        (**self).invalidate_page(page);
    }

    fn invalidate_all(&self) {
        (**self).invalidate_all();
    }

    fn active_root(&self) -> Option<PhysicalAddress> {
        (**self).active_root()
    }
}

/// Broadcast hook that asks the other execution contexts to invalidate.
///
/// Boot firmware usually runs on one processor; platforms that start the
/// others early plug their shootdown IPI in here.
pub trait RemoteInvalidation {
    fn broadcast_page(&self, page: VirtualPage<Size4K>);
    fn broadcast_all(&self);
}

/// No other contexts translate through these tables.
#[derive(Copy, Clone, Debug, Default)]
pub struct SingleContext;

impl RemoteInvalidation for SingleContext {
    fn broadcast_page(&self, _page: VirtualPage<Size4K>) {}
    fn broadcast_all(&self) {}
}

/// The current processor's TLB via `invlpg` and CR3 reloads.
#[derive(Copy, Clone, Debug, Default)]
pub struct LocalTlb;

impl TranslationCache for LocalTlb {
    fn invalidate_page(&self, page: VirtualPage<Size4K>) {
        // SAFETY: firmware runs at CPL 0.
        unsafe { firmware_registers::tlb::invlpg(page.base()) }
    }

    fn invalidate_all(&self) {
        // SAFETY: firmware runs at CPL 0.
        unsafe { firmware_registers::tlb::flush_local() }
    }

    #[cfg(all(target_arch = "x86_64", target_os = "uefi"))]
    fn active_root(&self) -> Option<PhysicalAddress> {
        use firmware_registers::{Cr3, LoadRegisterUnsafe};
        // SAFETY: firmware runs at CPL 0.
        Some(unsafe { Cr3::load_unsafe() }.pml4_phys())
    }
}

/// Local invalidation followed by a broadcast to the other contexts.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllContexts<L, R> {
    pub local: L,
    pub remote: R,
}

impl<L, R> AllContexts<L, R> {
    pub const fn new(local: L, remote: R) -> Self {
        Self { local, remote }
    }
}

impl<L: TranslationCache, R: RemoteInvalidation> TranslationCache for AllContexts<L, R> {
    fn invalidate_page(&self, page: VirtualPage<Size4K>) {
        self.local.invalidate_page(page);
        self.remote.broadcast_page(page);
    }

    fn invalidate_all(&self) {
        self.local.invalidate_all();
        self.remote.broadcast_all();
    }

    fn active_root(&self) -> Option<PhysicalAddress> {
        self.local.active_root()
    }
}
