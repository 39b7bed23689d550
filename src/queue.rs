// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A bounded FIFO for passing small records between contexts.
//!
//! `Queue<T, N>` holds at most `N` values inline, with no heap allocation.
//! All `N` slots are usable.
//!
//! Pushing never blocks the producer in the way the key path uses it:
//! [`Queue::try_push`] hands the value back when the queue is full, and the
//! caller decides whether to drop it. Consumers can poll with
//! [`Queue::try_pop`] or wait with [`Queue::pop`].
//!
//! # Implementation
//!
//! The ring lives inside a `critical_section::Mutex`, so any context,
//! including an ISR, may push or pop. Each operation holds the critical
//! section only for a few loads and stores.

use core::cell::RefCell;

use critical_section::Mutex as CsMutex;

use crate::exec::Notify;

struct Ring<T, const N: usize> {
    slots: [Option<T>; N],
    /// Index of the oldest element.
    head: usize,
    /// Number of occupied slots.
    len: usize,
}

impl<T, const N: usize> Ring<T, N> {
    fn push(&mut self, value: T) -> Result<(), T> {
        if self.len == N {
            return Err(value);
        }
        let tail = (self.head + self.len) % N;
        self.slots[tail] = Some(value);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        value
    }
}

/// A bounded multi-producer, multi-consumer queue of `Copy` records.
///
/// See the module docs for details.
pub struct Queue<T, const N: usize> {
    ring: CsMutex<RefCell<Ring<T, N>>>,
    /// Signals blocked poppers that an element has been pushed.
    pushed: Notify,
}

impl<T, const N: usize> core::fmt::Debug for Queue<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .field("capacity", &N)
            .finish()
    }
}

impl<T: Copy, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> Queue<T, N> {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            ring: CsMutex::new(RefCell::new(Ring {
                slots: [None; N],
                head: 0,
                len: 0,
            })),
            pushed: Notify::new(),
        }
    }
}

impl<T, const N: usize> Queue<T, N> {
    /// Number of records the queue can hold.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).len)
    }

    /// Checks whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to stuff `value` into the queue.
    ///
    /// If there is space, ownership of `value` moves into the queue and this
    /// returns `Ok(())`. If there is not space, this returns `Err(value)`.
    ///
    /// Never blocks; safe to call from an ISR.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        critical_section::with(|cs| self.ring.borrow_ref_mut(cs).push(value))?;
        self.pushed.notify();
        Ok(())
    }

    /// Pops the oldest element, if the queue is not empty.
    pub fn try_pop(&self) -> Option<T> {
        critical_section::with(|cs| self.ring.borrow_ref_mut(cs).pop())
    }

    /// Produces a future that resolves to the next element that can be
    /// popped from the queue. Waits without timeout.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// The element is removed in the same `poll` that resolves the future, so
    /// dropping it before then loses no data.
    pub async fn pop(&self) -> T {
        self.pushed.until_racy(|| self.try_pop()).await
    }
}

#[cfg(test)]
mod tests {
    use core::pin::pin;

    use super::*;

    #[test]
    fn fifo_order_and_capacity() {
        let q: Queue<u8, 4> = Queue::new();
        for i in 0..4 {
            assert_eq!(q.try_push(i), Ok(()));
        }
        assert_eq!(q.try_push(9), Err(9));
        assert_eq!(q.len(), 4);

        assert_eq!(q.try_pop(), Some(0));
        assert_eq!(q.try_push(4), Ok(()));
        for i in 1..5 {
            assert_eq!(q.try_pop(), Some(i));
        }
        assert_eq!(q.try_pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_waits_for_push() {
        futures::executor::block_on(async {
            let q: Queue<u8, 4> = Queue::new();
            let mut p = pin!(q.pop());
            assert!(futures::poll!(p.as_mut()).is_pending());
            q.try_push(7).unwrap();
            assert_eq!(futures::poll!(p.as_mut()), core::task::Poll::Ready(7));
        });
    }
}
