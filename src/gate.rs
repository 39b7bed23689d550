// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A bounded counting semaphore, used as the key-press gate.
//!
//! See the docs on [`Gate`] for more details.

use portable_atomic::{AtomicUsize, Ordering};

use crate::exec::Notify;

/// A counting semaphore with an upper bound on its permits.
///
/// A `Gate` holds between zero and `max` _permits._ [`Gate::acquire`] takes
/// one permit, blocking if none are available, and [`Gate::release`] puts one
/// back, waking a blocked acquirer.
///
/// The reference system uses a _binary_ gate (`max == 1`): the key task
/// releases it once per press, and the LED1 task acquires it once per wake.
/// Presses that arrive while the permit is still outstanding are coalesced,
/// and `release` reports that with [`GateFull`].
///
/// Unlike a `Mutex`, the releaser and the acquirer are usually different
/// tasks, so there is no permit object; the count is all there is.
///
/// # Fairness
///
/// None. If several tasks are blocked in `acquire`, whichever is polled first
/// after a release takes the permit. The reference system has exactly one
/// acquirer.
#[derive(Debug)]
pub struct Gate {
    available: AtomicUsize,
    max: usize,
    released: Notify,
}

/// Error produced by [`Gate::try_acquire`] when no permits were available.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NoPermits;

/// Error produced by [`Gate::release`] when the gate already holds its
/// maximum number of permits. The release has no effect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GateFull;

impl core::fmt::Display for GateFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("gate already holds its maximum permits")
    }
}

impl Gate {
    /// Returns a `Gate` holding `initial` permits out of at most `max`.
    ///
    /// `initial` is clamped to `max`.
    pub const fn new(max: usize, initial: usize) -> Self {
        let initial = if initial > max { max } else { initial };
        Self {
            available: AtomicUsize::new(initial),
            max,
            released: Notify::new(),
        }
    }

    /// Returns a binary gate with no permit available.
    pub const fn binary() -> Self {
        Self::new(1, 0)
    }

    /// Creates a future that will resolve when it can take a single permit
    /// from the gate. Until then, the future will remain pending (i.e.
    /// block), with no timeout.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// The permit is taken in the same `poll` that resolves the future, so a
    /// dropped future never holds one.
    pub async fn acquire(&self) {
        self.released
            .until_racy(|| self.try_acquire().is_ok())
            .await
    }

    /// Attempts to take a single permit, returning `Ok` if one is available
    /// immediately, or `Err` if they are all taken.
    pub fn try_acquire(&self) -> Result<(), NoPermits> {
        self.available
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |a| {
                a.checked_sub(1)
            })
            .map_err(|_| NoPermits)?;
        Ok(())
    }

    /// Puts one permit back and wakes blocked acquirers.
    ///
    /// If the gate is already full, nothing changes and this returns
    /// `Err(GateFull)`. Callers on the key path treat that as a coalesced
    /// press, not an error.
    ///
    /// This does not block and may be called from any task.
    pub fn release(&self) -> Result<(), GateFull> {
        let max = self.max;
        self.available
            .fetch_update(Ordering::Release, Ordering::Relaxed, |a| {
                if a < max {
                    Some(a + 1)
                } else {
                    None
                }
            })
            .map_err(|_| GateFull)?;
        self.released.notify();
        Ok(())
    }

    /// Returns the number of permits available.
    ///
    /// Note that this is a _snapshot._ Another acquirer may be racing you.
    pub fn permits_available(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use core::pin::pin;

    use super::*;

    #[test]
    fn binary_gate_starts_closed() {
        let gate = Gate::binary();
        assert_eq!(gate.try_acquire(), Err(NoPermits));
        assert_eq!(gate.permits_available(), 0);
    }

    #[test]
    fn release_saturates_at_max() {
        let gate = Gate::binary();
        assert_eq!(gate.release(), Ok(()));
        assert_eq!(gate.release(), Err(GateFull));
        assert_eq!(gate.permits_available(), 1);
        assert_eq!(gate.try_acquire(), Ok(()));
        assert_eq!(gate.try_acquire(), Err(NoPermits));
    }

    #[test]
    fn initial_is_clamped() {
        let gate = Gate::new(2, 5);
        assert_eq!(gate.permits_available(), 2);
    }

    #[test]
    fn acquire_blocks_until_release() {
        futures::executor::block_on(async {
            let gate = Gate::binary();

            let mut acq = pin!(gate.acquire());
            assert!(futures::poll!(acq.as_mut()).is_pending());
            assert!(futures::poll!(acq.as_mut()).is_pending());

            gate.release().unwrap();
            assert!(futures::poll!(acq.as_mut()).is_ready());

            // Exactly one permit was consumed by exactly one wake.
            assert_eq!(gate.permits_available(), 0);
        });
    }
}
