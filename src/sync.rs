//! Hand-rolled narrow spin locks. The teacher reaches for `std::sync::Mutex`
//! for its coarse, rarely-contended locks; the critical sections named in
//! the concurrency model here (free-list pop, chunk growth, count bump) are
//! short enough, and hot enough, that a spin lock with no OS-parking
//! round-trip is the better fit, so they're hand-rolled rather than pulled
//! from a crate.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub fn new() -> Self {
        SpinLock { locked: AtomicBool::new(false) }
    }

    pub fn lock(&self) -> SpinLockGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A spin lock guarding a value, for the small bookkeeping structs behind
/// the per-registry locks named in the concurrency model (free-list,
/// disposal queue, enqueued argument-buffer bindings, ...).
pub struct SpinMutex<T> {
    lock: SpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub fn new(value: T) -> Self {
        SpinMutex { lock: SpinLock::new(), value: UnsafeCell::new(value) }
    }

    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        let guard = self.lock.lock();
        SpinMutexGuard { _guard: guard, value: &self.value }
    }
}

pub struct SpinMutexGuard<'a, T> {
    _guard: SpinLockGuard<'a>,
    value: &'a UnsafeCell<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.value.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.value.get() }
    }
}
