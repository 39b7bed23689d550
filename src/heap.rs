// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Occupancy accounting for the general-purpose heap.
//!
//! The block pool never touches the general heap, but the diagnostics do:
//! they report how full it is and how long it takes to allocate from it.
//! [`TrackedHeap`] wraps any `GlobalAlloc` with a fixed byte budget and keeps
//! the two numbers the reports need, current free bytes and the lowest free
//! figure ever seen. A board can install it as its global allocator:
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: TrackedHeap<SomeAllocator> = TrackedHeap::new(SomeAllocator::new(), 15 * 1024);
//! ```
//!
//! Sizes are counted as requested by the caller, not including whatever the
//! underlying allocator adds for alignment or headers.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use portable_atomic::{AtomicUsize, Ordering};

/// Snapshot of heap occupancy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeapStats {
    /// Size of the heap budget in bytes.
    pub total: usize,
    /// Bytes not currently allocated.
    pub free: usize,
    /// Lowest value `free` has ever had.
    pub min_ever_free: usize,
}

impl HeapStats {
    /// Bytes currently allocated.
    pub fn used(&self) -> usize {
        self.total - self.free
    }

    /// Allocated share of the budget in whole percent, rounded down. Zero
    /// for an empty budget.
    pub fn usage_percent(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.used() * 100 / self.total
        }
    }
}

/// A heap that the diagnostics can sample and allocate from.
pub trait Heap: Sync {
    /// Current occupancy.
    fn stats(&self) -> HeapStats;

    /// Allocates a region described by `layout`, or returns `None` if the
    /// heap can't satisfy it.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a region to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`Heap::allocate`] on this heap with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

/// A `GlobalAlloc` wrapper with a byte budget and occupancy counters.
#[derive(Debug)]
pub struct TrackedHeap<A> {
    inner: A,
    total: usize,
    used: AtomicUsize,
    peak_used: AtomicUsize,
}

impl<A> TrackedHeap<A> {
    /// Wraps `inner`, allowing at most `total` bytes to be outstanding.
    pub const fn new(inner: A, total: usize) -> Self {
        Self {
            inner,
            total,
            used: AtomicUsize::new(0),
            peak_used: AtomicUsize::new(0),
        }
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> HeapStats {
        let used = self.used.load(Ordering::Acquire);
        let peak = self.peak_used.load(Ordering::Acquire);
        HeapStats {
            total: self.total,
            free: self.total - used,
            min_ever_free: self.total - peak.max(used),
        }
    }

    /// Claims `size` bytes of budget, returning the new total in use, or
    /// `None` if that would exceed the budget. The peak is left alone until
    /// the allocation actually succeeds.
    fn reserve(&self, size: usize) -> Option<usize> {
        let total = self.total;
        let before = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |u| {
                u.checked_add(size).filter(|&n| n <= total)
            })
            .ok()?;
        Some(before + size)
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackedHeap<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(after) = self.reserve(layout.size()) else {
            return core::ptr::null_mut();
        };
        // Safety: forwarded from our caller.
        let p = unsafe { self.inner.alloc(layout) };
        if p.is_null() {
            self.used.fetch_sub(layout.size(), Ordering::AcqRel);
        } else {
            self.peak_used.fetch_max(after, Ordering::AcqRel);
        }
        p
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Safety: forwarded from our caller.
        unsafe { self.inner.dealloc(ptr, layout) };
        self.used.fetch_sub(layout.size(), Ordering::AcqRel);
    }
}

impl<A: GlobalAlloc + Sync> Heap for TrackedHeap<A> {
    fn stats(&self) -> HeapStats {
        TrackedHeap::stats(self)
    }

    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // Safety: layout has non-zero size, checked above.
        NonNull::new(unsafe { GlobalAlloc::alloc(self, layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: our caller guarantees `ptr` came from `allocate` with
        // this layout, which is exactly GlobalAlloc::alloc.
        unsafe { GlobalAlloc::dealloc(self, ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(n: usize) -> Layout {
        Layout::from_size_align(n, 4).unwrap()
    }

    #[test]
    fn counters_follow_allocations() {
        let heap = TrackedHeap::new(std::alloc::System, 1024);
        assert_eq!(
            heap.stats(),
            HeapStats {
                total: 1024,
                free: 1024,
                min_ever_free: 1024
            }
        );

        let a = heap.allocate(layout(100)).unwrap();
        let b = heap.allocate(layout(300)).unwrap();
        assert_eq!(heap.stats().free, 624);
        unsafe { heap.free(a, layout(100)) };
        let s = heap.stats();
        assert_eq!(s.free, 724);
        assert_eq!(s.min_ever_free, 624);
        assert_eq!(s.used(), 300);
        assert_eq!(s.usage_percent(), 29);
        unsafe { heap.free(b, layout(300)) };
        assert_eq!(heap.stats().free, 1024);
    }

    #[test]
    fn budget_is_enforced() {
        let heap = TrackedHeap::new(std::alloc::System, 256);
        let a = heap.allocate(layout(200)).unwrap();
        assert!(heap.allocate(layout(100)).is_none());
        // A refused request doesn't consume budget.
        assert_eq!(heap.stats().free, 56);
        unsafe { heap.free(a, layout(200)) };
        assert!(heap.allocate(layout(0)).is_none());
    }

    /// Allocator that has run out of memory.
    struct Exhausted;

    unsafe impl GlobalAlloc for Exhausted {
        unsafe fn alloc(&self, _: Layout) -> *mut u8 {
            core::ptr::null_mut()
        }

        unsafe fn dealloc(&self, _: *mut u8, _: Layout) {}
    }

    #[test]
    fn inner_failure_leaves_counters_alone() {
        let heap = TrackedHeap::new(Exhausted, 1024);
        assert!(heap.allocate(layout(512)).is_none());
        assert_eq!(
            heap.stats(),
            HeapStats {
                total: 1024,
                free: 1024,
                min_ever_free: 1024
            }
        );
    }
}
