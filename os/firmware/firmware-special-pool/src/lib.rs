//! # Special Pool
//!
//! Guard-page allocator and stack guard for identity-mapped x86-64 firmware.
//!
//! Every allocation gets its own run of pages with a not-present page on
//! either side (or one, see [`GuardPlacement`]). Reading or writing a single
//! byte past the allocation faults right at the offending instruction
//! instead of corrupting a neighbour.
//!
//! ```text
//!   Head alignment                        Tail alignment
//! | guard | data ..........   | guard |  | guard |   .......... data | guard |
//!         ^ returned address                       ^ returned address
//! ```
//!
//! - [`SpecialPool`]: allocate / free over a [`BulkAllocator`] and a
//!   [`PageProtection`](firmware_paging::PageProtection).
//! - [`install_stack_guard`]: one guard page next to a stack.
//! - [`PoolConfig`]: guard placement, alignment, poisoning, monitored memory
//!   types and the range prepared at start-up.
//!
//! On platforms without flat 4-level paging every operation returns
//! `Unsupported` and changes nothing.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bulk;
mod config;
mod error;
mod memory_type;
mod pool;
mod record;
pub mod stack_guard;

pub use bulk::BulkAllocator;
pub use config::{
    DEFAULT_QUARANTINE_DEPTH, DEFAULT_RANGE_END, DEFAULT_TAIL_ALIGNMENT, DataAlignment,
    GuardPlacement, PoolConfig,
};
pub use error::{PoolError, StackGuardError};
pub use memory_type::{MemoryType, MemoryTypeMask};
pub use pool::{PoolStats, SpecialPool};
pub use record::GuardedAllocation;
pub use stack_guard::{
    FaultRouting, StackFaultVector, StackGrowth, StackGuard, guard_page,
    initialize_stack_fault_handling, install_stack_guard,
};
