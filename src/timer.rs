// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic software timers and the task that runs them.
//!
//! A [`PeriodicTimer`] is a name, a period and a callback. A
//! [`TimerService`] owns a fixed set of them and is itself just a future:
//! it sleeps on the [`Timebase`] until the earliest deadline, runs every
//! callback that is due, and goes back to sleep.
//!
//! Callbacks run in the timer service task, so they hold up every other
//! timer while they execute. Keep them to storing state and setting flag
//! bits; anything that prints or waits belongs in a task woken by those
//! bits.
//!
//! Each timer first fires one period after the service starts. If the
//! service falls behind (because a callback ran long, or the service wasn't
//! polled), each missed period still produces exactly one callback, delivered
//! back to back until the timer is on schedule again.

use core::convert::Infallible;

use crate::time::{Millis, TickTime, Timebase};

/// A named periodic callback.
pub struct PeriodicTimer<'a> {
    name: &'static str,
    period: Millis,
    next: TickTime,
    callback: &'a dyn Fn(),
}

impl core::fmt::Debug for PeriodicTimer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeriodicTimer")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl<'a> PeriodicTimer<'a> {
    /// Creates a timer that calls `callback` every `period` once its service
    /// starts.
    ///
    /// A zero period would have the service spin; `Config::validate` rejects
    /// it before any timer is built.
    pub fn new(name: &'static str, period: Millis, callback: &'a dyn Fn()) -> Self {
        Self {
            name,
            period,
            next: TickTime::default(),
            callback,
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Interval between firings.
    pub fn period(&self) -> Millis {
        self.period
    }

    /// When this timer fires next.
    pub fn next(&self) -> TickTime {
        self.next
    }
}

/// Runs a fixed set of periodic timers against a timebase.
#[derive(Debug)]
pub struct TimerService<'a, const N: usize> {
    timebase: &'a Timebase,
    timers: [PeriodicTimer<'a>; N],
}

impl<'a, const N: usize> TimerService<'a, N> {
    /// Collects `timers` into a service. Nothing is armed until
    /// [`start`][TimerService::start] or [`run`][TimerService::run].
    pub fn new(timebase: &'a Timebase, timers: [PeriodicTimer<'a>; N]) -> Self {
        Self { timebase, timers }
    }

    /// Arms every timer to fire one period from now.
    pub fn start(&mut self) {
        let now = self.timebase.now();
        for t in &mut self.timers {
            t.next = now + t.period;
        }
    }

    /// Runs the callback of every timer whose deadline has passed, once
    /// each, and moves those deadlines one period on. Returns the number of
    /// callbacks run.
    pub fn fire_due(&mut self) -> usize {
        let now = self.timebase.now();
        let mut fired = 0;
        for t in &mut self.timers {
            if t.next <= now {
                log::trace!("timer: {} fired", t.name);
                (t.callback)();
                t.next += t.period;
                fired += 1;
            }
        }
        fired
    }

    /// The earliest deadline across all timers, or `None` if there are none.
    pub fn next_deadline(&self) -> Option<TickTime> {
        self.timers.iter().map(|t| t.next).min()
    }

    /// The timers, for inspection.
    pub fn timers(&self) -> &[PeriodicTimer<'a>] {
        &self.timers
    }

    /// Arms the timers and services them forever.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// Dropping the future stops the timers between callbacks.
    pub async fn run(mut self) -> Infallible {
        self.start();
        loop {
            match self.next_deadline() {
                Some(deadline) => self.timebase.sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
            self.fire_due();
        }
    }
}
