// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small embedded concurrency kernel: a mutex-guarded block pool, and a
//! signal bus that fans a single key input out to several independent
//! reactive tasks.
//!
//! # The pieces
//!
//! - [`pool`] lends out fixed-size blocks, first fit, under a [`mutex`]
//!   whose critical region is only the scan-and-flip. Exhaustion is reported,
//!   never fatal.
//! - [`bus`] groups the three channels a key press is announced on: a binary
//!   [`gate`], an event-[`flags`] register, and a bounded key-state
//!   [`queue`]. Interrupt handlers reach it through one ISR-safe entry point.
//! - [`timer`] runs periodic callbacks that update the LED [`breath`] state
//!   and set flag bits.
//! - [`system`] holds all of it in one context and defines the tasks, each a
//!   plain `async fn` that waits on one primitive and then does a short,
//!   non-blocking action.
//! - [`heap`] and [`diag`] sample the general heap and print reports.
//!
//! # No executor here
//!
//! Tasks are `Future`s. This crate never decides when to poll them; that's
//! the board's executor. Everything that waits is built on [`exec::Notify`],
//! which only relies on the `Waker` contract, and is safe to signal from an
//! interrupt handler. Time comes from the board's tick interrupt calling
//! [`time::Timebase::on_tick`].
//!
//! The same code therefore runs on a Cortex-M executor, under
//! `futures::executor` on a host, or polled by hand in tests.
//!
//! # Cancellation
//!
//! None of the tasks expect to be cancelled, and no wait has a timeout. The
//! primitives still document their cancel behavior, and most are strictly
//! cancel-safe: dropping a pending wait leaves no visible side effect beyond
//! a possible spurious wake later.

#![cfg_attr(not(test), no_std)]
#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications
)]

pub mod board;
pub mod breath;
pub mod bus;
pub mod config;
pub mod diag;
pub mod error;
pub mod exec;
pub mod flags;
pub mod gate;
pub mod heap;
pub mod mutex;
pub mod pool;
pub mod queue;
pub mod system;
pub mod task;
pub mod time;
pub mod timer;

pub use error::InitError;
pub use system::{Board, System};
