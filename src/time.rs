// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timekeeping driven by an external tick interrupt.
//!
//! The board owns the hardware timer. Its tick interrupt calls
//! [`Timebase::on_tick`], which advances a monotonic counter and wakes any
//! task sleeping on the timebase. This module provides ways to read that
//! counter and to arrange for tasks to be woken at specific times (such as
//! [`Timebase::sleep_until`] and [`Timebase::sleep_for`]).
//!
//! # Types for describing time
//!
//! `TickTime` represents a specific point in time, measured as a number of
//! ticks since the timebase was created. It's a 64-bit count, so overflow can
//! be ignored. `TickTime` is analogous to `std::time::Instant`.
//!
//! `Millis` represents a relative time interval in ticks. The reference board
//! runs a 1 kHz tick, hence the name. It uses the same representation as
//! `TickTime`, so adding them together is cheap.
//!
//! # Sleeping
//!
//! Every tick notifies every sleeper, and each sleeper re-checks its own
//! deadline. With the handful of fixed tasks this crate runs, that is cheaper
//! than keeping a sorted timer list.

use core::future::Future;
use core::ops::{Add, AddAssign};

use portable_atomic::{AtomicU32, Ordering};

use crate::exec::Notify;

/// Number of sleeper wakers the timebase tracks without falling back to
/// polling. Sized for the full task roster plus slack.
pub const TIMEBASE_SLOTS: usize = 16;

/// Represents a moment in time by the value of the tick counter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct TickTime(u64);

impl TickTime {
    /// Constructs a `TickTime` value describing a certain number of ticks
    /// since the timebase started.
    pub const fn from_ticks(t: u64) -> Self {
        Self(t)
    }

    /// Subtracts an earlier time from this one, giving the amount of time
    /// between them measured in `Millis`. Saturates at zero if `earlier` is
    /// actually later.
    pub fn millis_since(self, earlier: TickTime) -> Millis {
        Millis(self.0.saturating_sub(earlier.0))
    }
}

impl From<TickTime> for u64 {
    fn from(t: TickTime) -> Self {
        t.0
    }
}

/// A period of time measured in ticks (milliseconds on the reference board).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Millis(pub u64);

/// Adds a number of ticks to a `TickTime` with normal `+` overflow behavior.
impl Add<Millis> for TickTime {
    type Output = Self;
    fn add(self, other: Millis) -> Self::Output {
        TickTime(self.0 + other.0)
    }
}

impl AddAssign<Millis> for TickTime {
    fn add_assign(&mut self, other: Millis) {
        self.0 += other.0;
    }
}

impl From<Millis> for u64 {
    fn from(x: Millis) -> Self {
        x.0
    }
}

impl From<u64> for Millis {
    fn from(x: u64) -> Self {
        Self(x)
    }
}

impl core::fmt::Display for Millis {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Monotonic tick counter plus the wait list of tasks sleeping on it.
///
/// A `Timebase` is shared by reference between the tick interrupt and all
/// tasks, so it's normally placed in a `static`:
///
/// ```ignore
/// static TIMEBASE: Timebase = Timebase::new();
///
/// #[exception]
/// fn SysTick() {
///     TIMEBASE.on_tick();
/// }
/// ```
pub struct Timebase {
    /// Bottom 32 bits of the tick counter. Updated by ISR.
    tick: AtomicU32,
    /// Top 32 bits of the tick counter. Updated by ISR.
    epoch: AtomicU32,
    /// Signaled on every tick.
    ticked: Notify<TIMEBASE_SLOTS>,
}

impl core::fmt::Debug for Timebase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timebase").field("now", &self.now()).finish()
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new()
    }
}

impl Timebase {
    /// Creates a timebase reading zero.
    pub const fn new() -> Self {
        Self {
            tick: AtomicU32::new(0),
            epoch: AtomicU32::new(0),
            ticked: Notify::new(),
        }
    }

    /// Retrieves the current value of the tick counter.
    pub fn now(&self) -> TickTime {
        // This loop will only repeat if e != e2, which means we raced the
        // tick ISR across a 32-bit rollover.
        loop {
            let e = self.epoch.load(Ordering::SeqCst);
            let t = self.tick.load(Ordering::SeqCst);
            let e2 = self.epoch.load(Ordering::SeqCst);
            if e == e2 {
                break TickTime(((e as u64) << 32) | (t as u64));
            }
        }
    }

    /// Tick interrupt entry point. Advances the counter by one and wakes
    /// sleepers.
    ///
    /// Safe to call from an ISR.
    pub fn on_tick(&self) {
        if self.tick.fetch_add(1, Ordering::Release) == u32::MAX {
            self.epoch.fetch_add(1, Ordering::Release);
        }
        self.ticked.notify();
    }

    /// Delivers `n` ticks at once, as if the tick interrupt had fired `n`
    /// times back to back.
    pub fn advance(&self, n: u32) {
        for _ in 0..n {
            self.on_tick();
        }
    }

    /// Checks the clock to determine how much time has elapsed since the
    /// instant recorded by `since`.
    pub fn elapsed(&self, since: TickTime) -> Millis {
        self.now().millis_since(since)
    }

    /// Sleeps until the tick counter is equal to or greater than `deadline`.
    ///
    /// If `deadline` is already in the past, this will instantly become
    /// `Ready`.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// Dropping this future does nothing in particular.
    pub fn sleep_until(&self, deadline: TickTime) -> impl Future<Output = ()> + '_ {
        self.ticked.until_racy(move || self.now() >= deadline)
    }

    /// Sleeps until the tick counter has increased by `d`.
    ///
    /// The start time is captured when this is called, not at first poll.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    pub fn sleep_for(&self, d: Millis) -> impl Future<Output = ()> + '_ {
        self.sleep_until(self.now() + d)
    }

    /// Creates a [`PeriodicGate`] that releases every `interval`, starting
    /// right now.
    pub fn periodic(&self, interval: Millis) -> PeriodicGate<'_> {
        PeriodicGate {
            timebase: self,
            interval,
            next: self.now(),
        }
    }
}

/// Helper for doing something periodically, accurately.
///
/// A `PeriodicGate` can be used to *gate* (pause) execution of a task until a
/// point in time arrives; that point in time is *periodic*, meaning it repeats
/// at regular intervals. For example, to call the function `f` every 30
/// ticks, you would write:
///
/// ```ignore
/// let mut gate = timebase.periodic(Millis(30));
/// loop {
///     f();
///     gate.next_time().await;
/// }
/// ```
///
/// This maintains the interval consistently even if `f()` takes a variable
/// amount of time.
///
/// `PeriodicGate` has "catch-up" behavior: if one execution runs several
/// periods long, the gate releases immediately for each missed period until
/// it is back on schedule.
#[derive(Debug)]
pub struct PeriodicGate<'t> {
    timebase: &'t Timebase,
    interval: Millis,
    next: TickTime,
}

impl PeriodicGate<'_> {
    /// Returns a future that will resolve when it's time to execute again.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    pub async fn next_time(&mut self) {
        self.timebase.sleep_until(self.next).await;
        self.next += self.interval;
    }
}

#[cfg(test)]
mod tests {
    use core::pin::pin;
    use core::task::Context;

    use super::*;
    use crate::exec::tests::{spy_waker, wakes};

    #[test]
    fn tick_counter_advances() {
        let tb = Timebase::new();
        assert_eq!(tb.now(), TickTime::from_ticks(0));
        tb.advance(20);
        assert_eq!(tb.now(), TickTime::from_ticks(20));
        assert_eq!(tb.elapsed(TickTime::from_ticks(5)), Millis(15));
    }

    #[test]
    fn tick_counter_rolls_into_epoch() {
        let tb = Timebase::new();
        tb.tick.store(u32::MAX, Ordering::SeqCst);
        tb.on_tick();
        assert_eq!(u64::from(tb.now()), 1 << 32);
    }

    #[test]
    fn sleep_for_resolves_at_deadline() {
        let tb = Timebase::new();
        let (spy, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);

        let mut nap = pin!(tb.sleep_for(Millis(3)));
        assert!(nap.as_mut().poll(&mut cx).is_pending());

        tb.advance(2);
        assert!(wakes(&spy) >= 1);
        assert!(nap.as_mut().poll(&mut cx).is_pending());

        tb.on_tick();
        assert!(nap.poll(&mut cx).is_ready());
    }

    #[test]
    fn past_deadline_is_immediate() {
        let tb = Timebase::new();
        tb.advance(10);
        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);
        let nap = pin!(tb.sleep_until(TickTime::from_ticks(4)));
        assert!(nap.poll(&mut cx).is_ready());
    }

    #[test]
    fn periodic_gate_catches_up() {
        let tb = Timebase::new();
        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);
        let mut gate = tb.periodic(Millis(10));

        // First release is immediate.
        assert!(pin!(gate.next_time()).poll(&mut cx).is_ready());
        assert!(pin!(gate.next_time()).poll(&mut cx).is_pending());

        // Jump three periods ahead: the gate releases for each one missed.
        tb.advance(30);
        assert!(pin!(gate.next_time()).poll(&mut cx).is_ready());
        assert!(pin!(gate.next_time()).poll(&mut cx).is_ready());
        assert!(pin!(gate.next_time()).poll(&mut cx).is_ready());
        assert!(pin!(gate.next_time()).poll(&mut cx).is_pending());
    }
}
