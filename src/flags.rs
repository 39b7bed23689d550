// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A register of event bits that any number of tasks can wait on.
//!
//! Each waiter picks its own mask, whether it needs [`Combinator::Any`] or
//! [`Combinator::All`] of those bits, and whether the bits it matched are
//! cleared as it leaves ([`Clear::OnExit`]) or left for other waiters
//! ([`Clear::Keep`]). The test and the clear happen in one atomic
//! read-modify-write, so two waiters clearing the same bit cannot both see
//! it.
//!
//! There are two ways to set bits, kept separate on purpose:
//!
//! - [`EventFlags::set`] is the general path for task code.
//! - [`EventFlags::set_from_isr`] is the only flag operation an interrupt
//!   handler may call. It never blocks and reports whether a waiter became
//!   runnable, which is what the handler uses to decide whether to request a
//!   context switch on exit.
//!
//! # Pending requests
//!
//! Every wake goes to every subscriber, since a `Waker` says nothing about
//! what its task is waiting for. To answer "did anyone become runnable", a
//! pending [`Wait`] also enrolls its [`WaitFor`] in a small table while it is
//! blocked. Waiters that find the table full are counted instead, and any
//! such waiter makes the answer `true`.

use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use critical_section::Mutex as CsMutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::exec::Notify;

/// Number of distinct waiters the register tracks without falling back to
/// polling.
pub const FLAG_WAITER_SLOTS: usize = 8;

/// How a waiter's mask is matched against the register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Combinator {
    /// Wake when at least one bit of the mask is set.
    Any,
    /// Wake only when every bit of the mask is set.
    All,
}

/// What happens to the matched bits when a wait completes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Clear {
    /// Atomically clear the bits of the mask that were set.
    OnExit,
    /// Leave the register untouched.
    Keep,
}

/// A waiter's complete request: mask, combinator and clear policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WaitFor {
    /// Bits of interest.
    pub mask: u32,
    /// How `mask` is matched.
    pub combinator: Combinator,
    /// What to do with the matched bits.
    pub clear: Clear,
}

impl WaitFor {
    /// Wake on any bit of `mask`, clearing what was matched.
    pub const fn any(mask: u32) -> Self {
        Self {
            mask,
            combinator: Combinator::Any,
            clear: Clear::OnExit,
        }
    }

    /// Wake on all bits of `mask`, clearing them.
    pub const fn all(mask: u32) -> Self {
        Self {
            mask,
            combinator: Combinator::All,
            clear: Clear::OnExit,
        }
    }

    /// Same request, but leaving the bits set for other waiters.
    pub const fn keep(self) -> Self {
        Self {
            clear: Clear::Keep,
            ..self
        }
    }

    fn matches(&self, bits: u32) -> bool {
        match self.combinator {
            Combinator::Any => bits & self.mask != 0,
            Combinator::All => bits & self.mask == self.mask,
        }
    }
}

/// Requests of the waiters currently blocked on a register.
#[derive(Debug)]
struct Pending {
    requests: [Option<WaitFor>; FLAG_WAITER_SLOTS],
    /// Blocked waiters that found `requests` full.
    overflow: usize,
}

/// Where a blocked [`Wait`] is enrolled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Entry {
    Slot(usize),
    Overflow,
}

/// 32-bit event-flag register.
pub struct EventFlags {
    bits: AtomicU32,
    changed: Notify<FLAG_WAITER_SLOTS>,
    pending: CsMutex<RefCell<Pending>>,
}

impl core::fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventFlags")
            .field("bits", &self.get())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFlags {
    /// Creates a register with every bit clear.
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            changed: Notify::new(),
            pending: CsMutex::new(RefCell::new(Pending {
                requests: [None; FLAG_WAITER_SLOTS],
                overflow: 0,
            })),
        }
    }

    /// Sets `bits` from task context and wakes waiters so they can re-test
    /// their masks. Returns the register value after the set.
    pub fn set(&self, bits: u32) -> u32 {
        let after = self.bits.fetch_or(bits, Ordering::AcqRel) | bits;
        self.changed.notify();
        after
    }

    /// Sets `bits` from interrupt context.
    ///
    /// Never blocks and never touches anything but the register and its
    /// waiter tables. Returns `true` if a blocked waiter's request now
    /// matches, meaning the handler should request a context switch before
    /// returning. Waiters whose masks don't match are still woken to re-test,
    /// but don't count.
    pub fn set_from_isr(&self, bits: u32) -> bool {
        let after = self.bits.fetch_or(bits, Ordering::AcqRel) | bits;
        let runnable = self.any_matches(after);
        self.changed.notify();
        runnable
    }

    /// Clears `bits`, returning the register value before the clear.
    pub fn clear(&self, bits: u32) -> u32 {
        self.bits.fetch_and(!bits, Ordering::AcqRel)
    }

    /// Returns a snapshot of the register.
    pub fn get(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Tests the register against `req` without blocking.
    ///
    /// On a match, returns the register value observed at the match (before
    /// any clearing) and, if `req.clear` says so, clears the matched bits in
    /// the same atomic operation.
    pub fn try_wait(&self, req: WaitFor) -> Option<u32> {
        self.bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if !req.matches(bits) {
                    return None;
                }
                Some(match req.clear {
                    Clear::OnExit => bits & !req.mask,
                    Clear::Keep => bits,
                })
            })
            .ok()
    }

    /// Waits, without timeout, until the register satisfies `req`. Resolves to
    /// the register value observed at the match, before any clearing.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// Bits are only cleared in the `poll` that resolves the future. Dropping
    /// it withdraws its request.
    pub fn wait(&self, req: WaitFor) -> Wait<'_> {
        Wait {
            flags: self,
            req,
            entry: None,
        }
    }

    /// Number of waiters currently blocked on this register.
    pub fn waiter_count(&self) -> usize {
        critical_section::with(|cs| {
            let p = self.pending.borrow_ref(cs);
            p.requests.iter().flatten().count() + p.overflow
        })
    }

    fn enroll(&self, req: WaitFor) -> Entry {
        critical_section::with(|cs| {
            let mut p = self.pending.borrow_ref_mut(cs);
            match p.requests.iter().position(Option::is_none) {
                Some(i) => {
                    p.requests[i] = Some(req);
                    Entry::Slot(i)
                }
                None => {
                    p.overflow += 1;
                    Entry::Overflow
                }
            }
        })
    }

    fn withdraw(&self, entry: Entry) {
        critical_section::with(|cs| {
            let mut p = self.pending.borrow_ref_mut(cs);
            match entry {
                Entry::Slot(i) => p.requests[i] = None,
                Entry::Overflow => p.overflow -= 1,
            }
        })
    }

    fn any_matches(&self, bits: u32) -> bool {
        critical_section::with(|cs| {
            let p = self.pending.borrow_ref(cs);
            p.overflow != 0 || p.requests.iter().flatten().any(|r| r.matches(bits))
        })
    }
}

/// Future produced by [`EventFlags::wait`].
///
/// While pending it holds an enrollment in the register's request table;
/// resolving or dropping it gives that back.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Wait<'f> {
    flags: &'f EventFlags,
    req: WaitFor,
    entry: Option<Entry>,
}

impl Future for Wait<'_> {
    type Output = u32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
        let this = self.get_mut();
        // Enroll and subscribe before testing, so a set that races the test
        // both wakes us and counts us.
        if this.entry.is_none() {
            this.entry = Some(this.flags.enroll(this.req));
        }
        this.flags.changed.subscribe(cx.waker());
        match this.flags.try_wait(this.req) {
            Some(bits) => {
                if let Some(entry) = this.entry.take() {
                    this.flags.withdraw(entry);
                }
                Poll::Ready(bits)
            }
            None => Poll::Pending,
        }
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.flags.withdraw(entry);
        }
    }
}
