// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wake plumbing shared by every primitive in this crate.
//!
//! **Note:** this crate does not contain an executor. Tasks are plain
//! `Future`s, and parking/resuming them is whatever the board's executor does
//! with the `Waker` it passes in. Everything here is written against the
//! `Waker` contract only, so the same task code runs under a Cortex-M
//! executor, under `futures::executor` on a host, or polled by hand in tests.
//!
//! # Interrupts, wait, and notify
//!
//! The lowest-level tool is [`Notify`]. A task that wants to wait for some
//! condition subscribes its `Waker` to a `Notify`; whoever changes the
//! condition calls [`Notify::notify`], which wakes every subscriber. `notify`
//! is safe to call from an interrupt handler, which makes it the bridge
//! between ISRs and task code.
//!
//! Since a `Notify` can wake tasks whose condition is still false, waiting is
//! almost always done through [`Notify::until_racy`], which re-tests a
//! predicate on every wake.

use core::cell::RefCell;
use core::future::Future;
use core::mem;
use core::pin::Pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use critical_section::Mutex as CsMutex;
use pin_project::pin_project;

/// Number of distinct `Waker`s a [`Notify`] can hold before it falls back to
/// waking subscribers immediately.
pub const DEFAULT_NOTIFY_SLOTS: usize = 4;

/// Placeholder used to build empty subscriber tables in `const` context.
const NO_WAKER: Option<Waker> = None;

/// A task notification scheme that can be used to safely route events from
/// interrupt handlers to task code.
///
/// Any number of tasks can [`subscribe`][Notify::subscribe] to a `Notify`. When
/// [`notify`][Notify::notify] is called on it, all those tasks will be awoken
/// and their subscription is atomically ended. Because spurious wakes are
/// possible, the subscribed tasks may wake before `notify` is called. To check
/// if the desired condition has truly occurred, you'll generally want to call
/// [`until_racy`][Notify::until_racy] instead of using `subscribe` directly.
///
/// It is safe to call `notify` from an ISR.
///
/// # Subscriber table
///
/// Subscribers are kept in a fixed table of `N` slots, without heap
/// allocation. A `Waker` that is already present (as judged by
/// [`Waker::will_wake`]) is not stored twice, which matters because executors
/// that poll several processes inside one task hand them all the same
/// `Waker`.
///
/// If the table is full, the new subscriber is woken on the spot instead of
/// being recorded. It will then be polled again, re-test its condition, and
/// resubscribe. That degrades to polling under overload but never loses a
/// wake.
pub struct Notify<const N: usize = DEFAULT_NOTIFY_SLOTS> {
    wakers: CsMutex<RefCell<[Option<Waker>; N]>>,
}

impl<const N: usize> core::fmt::Debug for Notify<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Notify")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<const N: usize> Default for Notify<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Notify<N> {
    /// Creates a new `Notify` with no tasks waiting.
    pub const fn new() -> Self {
        Self {
            wakers: CsMutex::new(RefCell::new([NO_WAKER; N])),
        }
    }

    /// Adds the `Waker` to the set of waiters.
    ///
    /// This is a low-level operation. For using a `Notify` in practice, you
    /// probably want [`until_racy`][Notify::until_racy] instead.
    pub fn subscribe(&self, waker: &Waker) {
        let recorded = critical_section::with(|cs| {
            let mut slots = self.wakers.borrow_ref_mut(cs);
            if slots.iter().flatten().any(|w| w.will_wake(waker)) {
                return true;
            }
            match slots.iter_mut().find(|s| s.is_none()) {
                Some(slot) => {
                    *slot = Some(waker.clone());
                    true
                }
                None => false,
            }
        });

        if !recorded {
            // Table full. Have the caller come back around and check again.
            waker.wake_by_ref();
        }
    }

    /// Wakes all tasks whose wakers have been passed to `subscribe` since the
    /// last `notify`.
    ///
    /// Returns `true` if at least one subscriber was woken. Interrupt handlers
    /// use this to decide whether a context switch is worth requesting.
    ///
    /// As with any wake, this makes the tasks eligible for polling and does
    /// not cause any task code to run immediately.
    pub fn notify(&self) -> bool {
        let taken = critical_section::with(|cs| {
            mem::replace(&mut *self.wakers.borrow_ref_mut(cs), [NO_WAKER; N])
        });

        // Wakers run outside the critical section; some executors do real
        // work in `wake`.
        let mut woke = false;
        for waker in taken.into_iter().flatten() {
            waker.wake();
            woke = true;
        }
        woke
    }

    /// Returns the number of distinct wakers currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        critical_section::with(|cs| {
            self.wakers.borrow_ref(cs).iter().flatten().count()
        })
    }

    /// Waits for a condition to become true, in a way that tolerates race
    /// conditions with preempting interrupt handlers and other threads.
    ///
    /// `until_racy` repeatedly calls the `cond` function you provide,
    /// completing when it "passes" (see [`TestResult`]). The subscription
    /// happens _before_ each test of `cond`, so an event that lands between
    /// the test and the subscription still wakes us. If `cond` is
    /// immediately true, a spurious wakeup may follow later.
    ///
    /// All waits in this crate that can race an ISR or a second core use
    /// this form.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict, if no data is moved into `cond`.
    pub fn until_racy<F, T: TestResult>(&self, cond: F) -> UntilRacy<'_, F, N>
    where
        F: FnMut() -> T,
    {
        UntilRacy { cond, notify: self }
    }
}

/// Trait implemented by things that indicate success or failure, to be used
/// with [`Notify::until_racy`].
///
/// In practice this is `bool` (if there's no output associated with success) or
/// `Option<T>` (if there is).
pub trait TestResult {
    /// Type of content produced on success.
    type Output;
    /// Converts `self` into an `Option` that is `Some` on success, `None` on
    /// failure.
    fn into_test_result(self) -> Option<Self::Output>;
}

impl TestResult for bool {
    type Output = ();
    fn into_test_result(self) -> Option<Self::Output> {
        if self {
            Some(())
        } else {
            None
        }
    }
}

impl<T> TestResult for Option<T> {
    type Output = T;
    fn into_test_result(self) -> Option<Self::Output> {
        self
    }
}

/// Internal future type used to implement `Notify::until_racy`. This makes
/// it much easier to recognize the future in a debugger.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct UntilRacy<'n, F, const N: usize> {
    cond: F,
    notify: &'n Notify<N>,
}

impl<F, T, const N: usize> Future for UntilRacy<'_, F, N>
where
    F: FnMut() -> T,
    T: TestResult,
{
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        p.notify.subscribe(cx.waker());
        if let Some(x) = (p.cond)().into_test_result() {
            Poll::Ready(x)
        } else {
            Poll::Pending
        }
    }
}

static NOOP_VTABLE: RawWakerVTable = RawWakerVTable::new(
    |x| RawWaker::new(x, &NOOP_VTABLE),
    |_| (),
    |_| (),
    |_| (),
);

/// Returns a `Waker` that doesn't do anything and costs nothing to clone.
///
/// Handy for polling a future by hand when the result of the wake doesn't
/// matter, such as in a superloop that polls everything every time around.
pub fn noop_waker() -> Waker {
    // Safety: Waker::from_raw is unsafe because the waker can trivially
    // violate the RawWakerVTable contract. We're not doing that, though.
    unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &NOOP_VTABLE)) }
}
