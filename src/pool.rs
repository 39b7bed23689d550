// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-block memory pool.
//!
//! A [`Pool`] owns `N` blocks of `B` bytes each, allocated once at creation
//! and never grown. [`Pool::allocate`] hands out the lowest-numbered free
//! block; [`Pool::release`] takes it back. Both are serialized by a
//! [`Mutex`] whose critical region is only the O(N) scan-and-flip. Callers
//! may hold a block for as long as they like without getting in anyone
//! else's way.
//!
//! Blocks are identified on release by the address of their storage, the
//! same way a C pool would compare pointers. A [`BlockRef`] that this pool
//! did not hand out (say, one from a different pool) matches nothing and the
//! release silently does nothing. Don't rely on that as validation.
//!
//! The pool is for task context only. Interrupt handlers must not touch it.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::mutex::Mutex;

/// One fixed-size allocation unit.
struct Block<const B: usize> {
    storage: UnsafeCell<[u8; B]>,
}

/// A fixed-capacity pool of `N` blocks of `B` bytes.
pub struct Pool<const N: usize, const B: usize> {
    blocks: [Block<B>; N],
    /// `in_use[i]` is true exactly while block `i` is lent out.
    in_use: Mutex<[bool; N]>,
}

// Safety: block storage is only reachable through a `BlockRef`, and the
// `in_use` table (guarded by the mutex) guarantees at most one `BlockRef`
// exists per block at a time.
unsafe impl<const N: usize, const B: usize> Sync for Pool<N, B> {}

impl<const N: usize, const B: usize> core::fmt::Debug for Pool<N, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("blocks", &N)
            .field("block_size", &B)
            .finish_non_exhaustive()
    }
}

impl<const N: usize, const B: usize> Default for Pool<N, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const B: usize> Pool<N, B> {
    /// Creates a pool with every block free and zeroed.
    pub fn new() -> Self {
        Self {
            blocks: core::array::from_fn(|_| Block {
                storage: UnsafeCell::new([0; B]),
            }),
            in_use: Mutex::new([false; N]),
        }
    }

    /// Number of blocks in the pool.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Size of each block in bytes.
    pub const fn block_size(&self) -> usize {
        B
    }

    /// Lends out the lowest-numbered free block, or returns `None` if every
    /// block is in use.
    ///
    /// Waits without timeout for the pool lock, but the lock is only ever
    /// held for one scan, so the wait is short. Exhaustion is not retried;
    /// that's up to the caller.
    pub async fn allocate(&self) -> Option<BlockRef<'_, B>> {
        let index = self
            .in_use
            .perform(|in_use| {
                let index = in_use.iter().position(|used| !used)?;
                in_use[index] = true;
                Some(index)
            })
            .await;

        match index {
            Some(i) => {
                log::debug!("pool: block {} allocated", i);
                Some(self.lend(i))
            }
            None => {
                log::debug!("pool: exhausted");
                None
            }
        }
    }

    /// Takes back a block.
    ///
    /// The block is located by comparing its storage address against every
    /// block in this pool. If none matches, nothing happens and nothing is
    /// reported.
    pub async fn release(&self, block: BlockRef<'_, B>) {
        let target = block.ptr.as_ptr().cast_const();
        let found = self
            .in_use
            .perform(|in_use| {
                let index = self
                    .blocks
                    .iter()
                    .position(|b| b.storage.get().cast_const() == target)?;
                in_use[index] = false;
                Some(index)
            })
            .await;

        match found {
            Some(i) => log::debug!("pool: block {} freed", i),
            None => log::debug!("pool: release of unknown block ignored"),
        }
    }

    /// Number of blocks currently lent out.
    pub async fn in_use_count(&self) -> usize {
        self.in_use
            .perform(|in_use| in_use.iter().filter(|u| **u).count())
            .await
    }

    /// Checks whether block `index` is currently lent out. Out-of-range
    /// indices are never in use.
    pub async fn is_in_use(&self, index: usize) -> bool {
        self.in_use
            .perform(|in_use| in_use.get(index).copied().unwrap_or(false))
            .await
    }

    fn lend(&self, index: usize) -> BlockRef<'_, B> {
        // The caller just flipped `in_use[index]` under the lock, so the
        // storage is ours to hand out.
        let ptr = self.blocks[index].storage.get();
        BlockRef {
            // UnsafeCell::get never returns null.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            index,
            _pool: PhantomData,
        }
    }
}

/// Exclusive loan of one block's storage.
///
/// Dereferences to the block's bytes. Hand it back with [`Pool::release`];
/// dropping it without releasing leaves the block marked in use.
#[must_use = "a dropped BlockRef leaks its block until the pool is rebuilt"]
pub struct BlockRef<'p, const B: usize> {
    ptr: NonNull<[u8; B]>,
    index: usize,
    _pool: PhantomData<&'p ()>,
}

// Safety: a BlockRef is the unique handle to its block's bytes.
unsafe impl<const B: usize> Send for BlockRef<'_, B> {}

impl<const B: usize> BlockRef<'_, B> {
    /// Index of this block in the pool that lent it.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<const B: usize> core::fmt::Debug for BlockRef<'_, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockRef")
            .field("index", &self.index)
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl<const B: usize> Deref for BlockRef<'_, B> {
    type Target = [u8; B];

    fn deref(&self) -> &Self::Target {
        // Safety: the pool lends each block to at most one BlockRef.
        unsafe { self.ptr.as_ref() }
    }
}

impl<const B: usize> DerefMut for BlockRef<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: as for Deref, plus we have &mut self.
        unsafe { self.ptr.as_mut() }
    }
}
