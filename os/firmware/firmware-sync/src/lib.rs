//! # Firmware synchronization primitives
//!
//! Boot-time firmware has no scheduler to park on, so everything here spins.
//! [`SpinLock`] guards bookkeeping (ledgers, allocation records);
//! [`RwSpinLock`] guards the translation hierarchy so that presence toggles
//! can run side by side while structural edits stay exclusive.
//! [`SyncOnceCell`] holds values that firmware callbacks find through a
//! `static`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod once_cell;
mod rw_spin_lock;
mod spin_lock;

pub use once_cell::SyncOnceCell;
pub use rw_spin_lock::{RwSpinLock, RwSpinReadGuard, RwSpinWriteGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
