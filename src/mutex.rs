// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mutex whose only access path is a synchronous closure.
//!
//! This implements a mutex (a kind of lock) guarding a value of type `T`. It
//! deliberately does _not_ expose an RAII-style guard. The only operations are
//! [`Mutex::perform`] and [`Mutex::try_perform`], which take a function of
//! your choice, lock the mutex, apply the function, and unlock. The function
//! is a normal Rust closure, not an `async` block, so there is no opportunity
//! to `await` with the mutex locked.
//!
//! That shape is exactly what the block pool needs: the lock covers a short
//! scan-and-flip step and is never held while a caller uses the storage it
//! was handed.
//!
//! # Implementation details
//!
//! The lock state is a single atomic flag. Contending tasks subscribe to a
//! [`Notify`] that is signaled on every unlock, and retry. This is not fair:
//! whichever waiter is polled first after an unlock wins. Waiting tasks never
//! spin, though, and the wait is indefinite.
//!
//! This mutex must never be used from an ISR. An interrupt handler that
//! found it locked would have nowhere to wait.

use core::cell::UnsafeCell;

use portable_atomic::{AtomicBool, Ordering};
use scopeguard::defer;

use crate::exec::Notify;

/// Holds a `T` that can be accessed from multiple concurrent futures/tasks, but
/// only one at a time.
pub struct Mutex<T> {
    /// `true` while some caller is inside `perform`.
    locked: AtomicBool,
    /// Signaled on every unlock.
    released: Notify,
    /// The contents of the mutex. Safe to access only when `locked` has been
    /// atomically flipped false->true by the accessor.
    value: UnsafeCell<T>,
}

// Safety: access to `value` is serialized by `locked`, so sharing a `Mutex`
// is as good as sending the `T` to whoever holds the lock.
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> core::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex holding `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            released: Notify::new(),
            value: UnsafeCell::new(contents),
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        self.released.notify();
    }

    /// Locks this mutex immediately if it is free, and applies the operation
    /// `op` to its contents before unlocking it. This is a non-blocking version
    /// of [`Mutex::perform`].
    ///
    /// If the mutex is free, returns the value returned from `op`, wrapped in
    /// `Some`. If the mutex is _not_ free, returns `None`.
    pub fn try_perform<R>(&self, op: impl FnOnce(&mut T) -> R) -> Option<R> {
        if self.try_lock() {
            defer! { self.unlock(); }
            // Safety: we hold the lock, so this is the only live reference.
            Some(op(unsafe { &mut *self.value.get() }))
        } else {
            None
        }
    }

    /// Returns a future that will attempt to obtain the mutex each time it
    /// gets polled, completing only when it succeeds. When it succeeds it
    /// immediately applies `op` to the contents, unlocks, and resolves to the
    /// value returned by `op`.
    ///
    /// If the mutex is free at the time of the first `poll`, the future will
    /// resolve without blocking.
    ///
    /// There is no timeout. A caller that cannot accept an unbounded wait
    /// should use [`Mutex::try_perform`].
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// The lock is only ever held inside a single `poll`, so dropping the
    /// future can never leave the mutex locked. `op` is dropped unrun.
    pub async fn perform<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        self.released.until_racy(|| self.try_lock()).await;
        defer! { self.unlock(); }
        // Safety: we hold the lock, so this is the only live reference.
        op(unsafe { &mut *self.value.get() })
    }
}
