//! # Page Table Editor
//!
//! Live editing of x86-64 4-level translation hierarchies for identity-mapped
//! firmware, built for guard pages.
//!
//! ## What you get
//! - [`PageTableEditor`]: disable/enable single 4 KiB pages with exact
//!   restoration, split 1 GiB/2 MiB leaves, make ranges fine-grained, build
//!   a fresh identity map that keeps its own tables out of the stack.
//! - [`PageProtection`]: the capability-neutral interface over the editor,
//!   with [`Unsupported`] for processors without flat 4-level paging and
//!   [`Paging`] choosing between the two from a [`PagingCapability`].
//! - [`TranslationCache`]: TLB invalidation hooks ([`LocalTlb`],
//!   [`AllContexts`] with a [`RemoteInvalidation`] broadcast).
//! - [`PhysMapper`] and [`FrameSource`]: how table frames are reached and
//!   where new ones come from.
//!
//! ## Hierarchy
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! A PDPT entry with `PS=1` maps 1 GiB, a PD entry with `PS=1` maps 2 MiB and
//! a PT entry always maps 4 KiB. Guard pages need 4 KiB leaves, so large
//! leaves are split on demand: the new table is filled with 512 sub-leaves
//! that reproduce the old mapping, then a single store swaps it in.
//!
//! ## Example
//!
//! ```rust
//! use firmware_addresses::{PhysicalAddress, PhysicalRange, VirtualAddress, VirtualRange};
//! use firmware_paging::host::{HostMemory, RecordingCache};
//! use firmware_paging::{IdentityMapConfig, PageTableEditor};
//!
//! let memory = HostMemory::new(PhysicalAddress::new(0x10_0000), 64);
//! let cache = RecordingCache::new();
//! let config = IdentityMapConfig::new().with_physical_address_bits(32);
//! let editor = PageTableEditor::new(&memory, memory.frames(), &cache, config).unwrap();
//!
//! let stack = VirtualRange::new(VirtualAddress::new(0x8_0000), 0x4000).unwrap();
//! editor.build_identity_map(stack).unwrap();
//!
//! let page = VirtualAddress::new(0x4000_0000);
//! let data = VirtualRange::new(page, 0x1000).unwrap();
//! editor.ensure_fine_grained(data, PhysicalRange::empty()).unwrap();
//! editor.disable_page(page).unwrap();
//! assert!(editor.translate(page).is_err());
//! editor.enable_page(page).unwrap();
//! assert_eq!(editor.translate(page).unwrap().physical.as_u64(), 0x4000_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod arena;
mod editor;
mod entry;
mod error;
mod frames;
mod hierarchy;
mod identity;
mod mapper;
mod platform;
mod protection;
mod table;
mod tlb;
mod unsupported;

#[cfg(any(test, feature = "host"))]
pub mod host;

pub use arena::{TableArena, TableBlock, TableId, TableOrigin};
pub use editor::{PageTableEditor, Translation};
pub use entry::{
    ADDRESS_MASK_1G, ADDRESS_MASK_2M, ADDRESS_MASK_4K, PAGE_SIZE_BIT, PAT_LARGE_BIT, PageEntry,
    Permissions, leaf_mask,
};
pub use error::PagingError;
pub use frames::{FrameSource, claim_outside};
pub use identity::{IdentityMapConfig, MAX_PHYSICAL_ADDRESS_BITS, MIN_PHYSICAL_ADDRESS_BITS};
pub use mapper::{IdentityMapper, PhysMapper};
pub use platform::{MissingFeature, Paging, PagingCapability};
pub use protection::PageProtection;
pub use table::{ENTRIES, Level, PageTable};
pub use tlb::{AllContexts, LocalTlb, RemoteInvalidation, SingleContext, TranslationCache};
pub use unsupported::Unsupported;
