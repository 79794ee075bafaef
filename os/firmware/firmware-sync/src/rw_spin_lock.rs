use core::{
    cell::UnsafeCell,
    fmt,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Held exclusively by one writer.
const WRITER: usize = 1 << (usize::BITS - 1);

/// A writer is waiting; new readers back off so it cannot starve.
const PENDING: usize = 1 << (usize::BITS - 2);

/// Reader count lives in the remaining low bits.
const READERS: usize = !(WRITER | PENDING);

/// Reader/writer spin lock with writer preference.
///
/// Readers share the protected value; a writer waits for the readers to
/// drain and then owns it alone.
pub struct RwSpinLock<T> {
    state: AtomicUsize,
    inner: UnsafeCell<T>,
}

// Safety: readers hand out `&T` concurrently (needs `Sync`), writers `&mut T`
// on whichever thread holds the lock (needs `Send`).
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            state: AtomicUsize::new(0),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Try to take a shared guard without spinning.
    #[inline]
    pub fn try_read(&self) -> Option<RwSpinReadGuard<'_, T>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & (WRITER | PENDING) != 0 || s & READERS == READERS {
            return None;
        }
        self.state
            .compare_exchange(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwSpinReadGuard { lock: self })
    }

    /// Spin until shared access is available.
    #[inline]
    pub fn read(&self) -> RwSpinReadGuard<'_, T> {
        loop {
            if let Some(g) = self.try_read() {
                return g;
            }
            spin_loop();
        }
    }

    /// Try to take the exclusive guard without spinning.
    #[inline]
    pub fn try_write(&self) -> Option<RwSpinWriteGuard<'_, T>> {
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwSpinWriteGuard { lock: self })
    }

    /// Announce the writer, wait for readers to drain, then take exclusive access.
    #[inline]
    pub fn write(&self) -> RwSpinWriteGuard<'_, T> {
        loop {
            self.state.fetch_or(PENDING, Ordering::Relaxed);
            if self
                .state
                .compare_exchange_weak(PENDING, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return RwSpinWriteGuard { lock: self };
            }
            while self.state.load(Ordering::Relaxed) & (WRITER | READERS) != 0 {
                spin_loop();
            }
        }
    }

    /// Number of readers currently holding the lock.
    #[inline]
    pub fn readers(&self) -> usize {
        self.state.load(Ordering::Relaxed) & READERS
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for RwSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for RwSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.load(Ordering::Relaxed);
        f.debug_struct("RwSpinLock")
            .field("writer", &(s & WRITER != 0))
            .field("readers", &(s & READERS))
            .finish_non_exhaustive()
    }
}

pub struct RwSpinReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> Drop for RwSpinReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

pub struct RwSpinWriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for RwSpinWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for RwSpinWriteGuard<'_, T> {
    fn drop(&mut self) {
        // Leaves PENDING alone: another writer may already be queued.
        self.lock.state.fetch_and(!WRITER, Ordering::Release);
    }
}
