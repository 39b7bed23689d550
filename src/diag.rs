// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostic output: the console sink and the reports printed to it.
//!
//! Everything here is read-only with respect to the system. Reports are
//! built from snapshots ([`HeapStats`], [`TaskState`]) and written a line at a
//! time to a [`Console`], which the board backs with its UART. Writes are
//! fire-and-forget; a console that can't keep up drops lines.
//!
//! The allocation-latency probe is the one active piece. It allocates from
//! the general heap and frees everything again before returning, so it never
//! leaves the heap fuller than it found it.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use crate::config::{TEST_LARGE_SIZE, TEST_MEDIUM_SIZE, TEST_SMALL_SIZE};
use crate::heap::{Heap, HeapStats};
use crate::task::TaskState;
use crate::time::{Millis, Timebase};

/// Line-oriented diagnostic sink.
pub trait Console: Sync {
    /// Writes one line. The console supplies the line ending.
    fn write_line(&self, line: fmt::Arguments<'_>);
}

/// The `=== Memory Status ===` block printed by the memory monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeapReport(pub HeapStats);

impl HeapReport {
    /// Writes the report to `console`.
    pub fn emit(&self, console: &dyn Console) {
        let s = &self.0;
        console.write_line(format_args!("=== Memory Status ==="));
        console.write_line(format_args!("Total Heap: {} bytes", s.total));
        console.write_line(format_args!("Free Heap: {} bytes", s.free));
        console.write_line(format_args!("Used Heap: {} bytes", s.used()));
        console.write_line(format_args!("Min Ever Free: {} bytes", s.min_ever_free));
        console.write_line(format_args!("Memory Usage: {}%", s.usage_percent()));
        console.write_line(format_args!("=================="));
    }
}

/// The short heap summary printed after a latency probe.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeapSummary(pub HeapStats);

impl HeapSummary {
    /// Writes the summary to `console`.
    pub fn emit(&self, console: &dyn Console) {
        console.write_line(format_args!("Memory Status:"));
        console.write_line(format_args!("Current free heap: {} bytes", self.0.free));
        console.write_line(format_args!(
            "Minimum ever free heap: {} bytes",
            self.0.min_ever_free
        ));
        console.write_line(format_args!("================================="));
    }
}

/// Run states of the three tasks the monitor watches.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusReport {
    /// State of the LED1 task.
    pub led1: TaskState,
    /// State of the LED2 task.
    pub led2: TaskState,
    /// State of the key task.
    pub key: TaskState,
}

impl StatusReport {
    /// Writes the `SystemStatus` block to `console`.
    pub fn emit(&self, console: &dyn Console) {
        console.write_line(format_args!("SystemStatus"));
        console.write_line(format_args!("LED1 Task: {}", self.led1));
        console.write_line(format_args!("LED2 Task: {}", self.led2));
        console.write_line(format_args!("KEY Task: {}", self.key));
        console.write_line(format_args!("="));
    }
}

/// One allocation size exercised by the latency probe.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SizeClass {
    /// Label used in the report, e.g. `Small`.
    pub label: &'static str,
    /// Bytes per allocation.
    pub size: usize,
    /// Byte written over every allocation.
    pub fill: u8,
}

/// The three classes the latency task runs, smallest first.
pub const SIZE_CLASSES: [SizeClass; 3] = [
    SizeClass {
        label: "Small",
        size: TEST_SMALL_SIZE,
        fill: 0xAA,
    },
    SizeClass {
        label: "Medium",
        size: TEST_MEDIUM_SIZE,
        fill: 0xBB,
    },
    SizeClass {
        label: "Large",
        size: TEST_LARGE_SIZE,
        fill: 0xCC,
    },
];

/// Result of probing one size class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LatencySample {
    /// The class probed.
    pub class: SizeClass,
    /// Ticks spent allocating, filling and freeing.
    pub elapsed: Millis,
    /// Allocations the heap refused.
    pub failures: usize,
}

impl LatencySample {
    /// Writes the result line, plus a failure line if anything was refused.
    pub fn emit(&self, console: &dyn Console) {
        console.write_line(format_args!("{self}"));
        if self.failures != 0 {
            console.write_line(format_args!(
                "{} of the allocations failed",
                self.failures
            ));
        }
    }
}

impl fmt::Display for LatencySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks ({} bytes) test time: {}",
            self.class.label, self.class.size, self.elapsed
        )
    }
}

/// Allocates `N` regions of `class.size` bytes from `heap`, fills each with
/// `class.fill`, then frees them all. Measures the whole run on `timebase`.
///
/// Refused allocations are counted, not retried. Everything that was
/// allocated is freed before this returns.
pub fn probe_latency<const N: usize>(
    heap: &dyn Heap,
    timebase: &Timebase,
    class: SizeClass,
) -> LatencySample {
    let start = timebase.now();
    let mut failures = 0;

    match Layout::from_size_align(class.size, core::mem::align_of::<usize>()) {
        Ok(layout) => {
            let mut held: [Option<NonNull<u8>>; N] = [None; N];
            for slot in &mut held {
                match heap.allocate(layout) {
                    Some(p) => {
                        // Safety: `p` is a fresh allocation of `layout.size()`
                        // bytes.
                        unsafe { p.as_ptr().write_bytes(class.fill, layout.size()) };
                        *slot = Some(p);
                    }
                    None => failures += 1,
                }
            }
            for p in held.into_iter().flatten() {
                // Safety: allocated above with this layout and not yet freed.
                unsafe { heap.free(p, layout) };
            }
        }
        Err(_) => failures = N,
    }

    LatencySample {
        class,
        elapsed: timebase.elapsed(start),
        failures,
    }
}
