//! Driver start-up: detect paging, take over (or adopt) the page tables,
//! prepare the special-pool range and guard the boot stack.

use crate::boot_alloc::{BootServicesFrames, BootServicesPages};
use crate::dispatch::SpecialPoolDxe;
use crate::fault_vector::IstStackVector;
use crate::hob::firmware_boot_stack;
use crate::hooks::pool_services;
use firmware_addresses::VirtualRange;
use firmware_paging::{
    IdentityMapConfig, IdentityMapper, LocalTlb, PageProtection, PageTableEditor, Paging,
    PagingCapability, PagingError,
};
use firmware_registers::cpuid::{self, AddressSizes, ExtendedFeatures};
use firmware_registers::{Cr3, LoadRegisterUnsafe};
use firmware_special_pool::{
    PoolConfig, PoolError, SpecialPool, StackGrowth, initialize_stack_fault_handling,
    install_stack_guard,
};
use log::{error, info, warn};

/// The page table editor as the driver runs it.
pub type Editor = PageTableEditor<IdentityMapper, BootServicesFrames, LocalTlb>;

/// The special pool as the driver runs it.
pub type DxePool = SpecialPool<Paging<Editor>, BootServicesPages>;

#[derive(Debug, thiserror::Error)]
pub enum DxeError {
    #[error("page table setup failed: {0}")]
    Paging(#[from] PagingError),
    #[error("special pool setup failed: {0}")]
    Pool(#[from] PoolError),
    #[error("boot services are not available")]
    NoBootServices,
}

#[derive(Copy, Clone, Debug)]
pub struct DxeConfig {
    pub pool: PoolConfig,
    pub identity: IdentityMapConfig,
    /// Build and activate a private identity map instead of editing the
    /// firmware's tables in place.
    pub rebuild_identity_map: bool,
}

impl Default for DxeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::new()
                .with_trap_null_page(true)
                .with_stack_fault_handling(true),
            identity: identity_config(cpuid::address_sizes(), cpuid::extended_features()),
            rebuild_identity_map: true,
        }
    }
}

/// Bring up the special pool.
///
/// Without flat 4-level paging the driver still comes up; every request
/// then goes to boot services.
///
/// # Errors
/// Building or adopting the page tables failed, or the special-pool range
/// could not be made fine-grained.
pub fn initialize(config: DxeConfig) -> Result<SpecialPoolDxe, DxeError> {
    log_config(&config);
    let fallback = pool_services().ok_or(DxeError::NoBootServices)?;

    let stack = firmware_boot_stack();
    match stack {
        Some(stack) => info!("Boot stack {stack} from the hand-off blocks"),
        None => warn!("No stack allocation hand-off block; the boot stack stays unguarded"),
    }
    // SAFETY: DXE drivers run at CPL 0.
    let capability = unsafe { PagingCapability::detect() };
    let no_execute = matches!(capability, PagingCapability::FourLevel { no_execute: true });
    let paging = Paging::select(capability, || build_editor(&config, stack, no_execute))?;

    let pool = SpecialPool::new(paging, BootServicesPages, config.pool);
    match pool.prepare() {
        Ok(tables) => info!("Special pool ready ({tables} page tables created)"),
        Err(PoolError::Unsupported) => {
            warn!("Special pool unavailable; all requests go to boot services");
        }
        Err(e) => return Err(e.into()),
    }

    let mut dxe = SpecialPoolDxe::new(pool, fallback);
    if config.pool.stack_fault_handling() && dxe.pool().paging().is_supported() {
        if let Some(stack) = stack {
            match install_stack_guard(dxe.pool().paging(), stack, StackGrowth::Down) {
                Ok(guard) => dxe.set_stack_guard(guard),
                Err(e) => error!("Stack guard for {stack} not installed: {e}"),
            }
        }
        match initialize_stack_fault_handling(Some(&IstStackVector)) {
            Ok(routing) => dxe.set_fault_routing(routing),
            Err(e) => error!("Stack-fault handling not initialized: {e}"),
        }
    }
    Ok(dxe)
}

fn build_editor(
    config: &DxeConfig,
    stack: Option<VirtualRange>,
    no_execute: bool,
) -> Result<Editor, PagingError> {
    // NX is a reserved bit while EFER.NXE is clear.
    let identity = config
        .identity
        .with_nx_for_stack(config.identity.nx_for_stack() && no_execute && stack.is_some());
    let stack = stack.unwrap_or_else(VirtualRange::empty);
    let frames = BootServicesFrames::default();
    if config.rebuild_identity_map {
        let editor = PageTableEditor::new(IdentityMapper, frames, LocalTlb, identity)?;
        editor.build_identity_map(stack)?;
        // SAFETY: the identity map covers all physical memory, this image and the stack.
        unsafe { editor.activate() };
        return Ok(editor);
    }

    // SAFETY: CPL 0.
    let root = unsafe { Cr3::load_unsafe() }.pml4_phys();
    // SAFETY: the firmware tables are identity mapped and from here on only
    // edited through this editor.
    unsafe { PageTableEditor::adopt(IdentityMapper, frames, LocalTlb, identity, root) }
}

fn log_config(config: &DxeConfig) {
    let pool = &config.pool;
    info!(
        "Special pool: guards {:?}, alignment {:?} (tail {}), types {:#x}, range {}",
        pool.guards(),
        pool.alignment(),
        pool.tail_alignment(),
        pool.memory_types().bits(),
        pool.range()
    );
    info!(
        "Special pool: null trap {}, stack faults {}, poisoning {} (quarantine {})",
        pool.trap_null_page(),
        pool.stack_fault_handling(),
        pool.poison_freed(),
        pool.quarantine_depth()
    );
    info!(
        "Identity map: {} physical address bits, 1 GiB leaves {}, rebuild {}",
        config.identity.physical_address_bits(),
        config.identity.use_1g_pages(),
        config.rebuild_identity_map
    );
}

/// The identity map the processor can run: MAXPHYADDR address bits, 1 GiB
/// leaves where the PDPT takes them.
fn identity_config(sizes: Option<AddressSizes>, features: Option<ExtendedFeatures>) -> IdentityMapConfig {
    let bits = sizes.map_or(AddressSizes::FALLBACK_PHYSICAL_BITS, |sizes| sizes.physical_bits());
    IdentityMapConfig::new()
        .with_physical_address_bits(bits)
        .with_use_1g_pages(features.is_some_and(|features| features.page_1gb()))
        .with_nx_for_stack(true)
}
