use core::cell::UnsafeCell;
use core::fmt;
use core::hint::spin_loop;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;

/// A value written at most once and shared from then on.
///
/// Meant for `static`s that firmware entry points and callbacks read, such
/// as a driver instance or a saved function table. Readers never block: until
/// the value is published they simply see `None`.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The value, once published.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == FULL {
            // SAFETY: FULL is only stored after the value was written.
            Some(unsafe { self.published() })
        } else {
            None
        }
    }

    /// Publish `value` unless a value was already written or is being
    /// written; then `value` comes back.
    ///
    /// # Errors
    /// The cell was taken; `value` is returned unchanged.
    pub fn set(&self, value: T) -> Result<&T, T> {
        if !self.claim() {
            return Err(value);
        }
        Ok(self.publish(value))
    }

    /// Publish `init()` if the cell is empty, otherwise wait for whoever
    /// got there first.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(value) = self.get() {
            return value;
        }
        if self.claim() {
            return self.publish(init());
        }
        while self.state.load(Ordering::Acquire) != FULL {
            spin_loop();
        }
        // SAFETY: FULL.
        unsafe { self.published() }
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn publish(&self, value: T) -> &T {
        // SAFETY: WRITING is held by this caller only; nobody reads yet.
        unsafe { (*self.value.get()).write(value) };
        self.state.store(FULL, Ordering::Release);
        // SAFETY: just written.
        unsafe { self.published() }
    }

    /// # Safety
    /// The state must be FULL.
    unsafe fn published(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == FULL {
            // SAFETY: FULL, and `&mut self` excludes readers.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SyncOnceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SyncOnceCell").field(&self.get()).finish()
    }
}

// SAFETY: shared access only after FULL; a single writer publishes.
unsafe impl<T: Send + Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
