//! Arenas: large regions of the backing heap split into pools.
//!
//! An arena is one [`ARENA_SIZE`] region acquired from the backing heap.
//! Pools are carved from its untouched space in address order, and pools that
//! become completely free are kept on a per-arena free-pool list for reuse.
//! When every pool of an arena is free at once, the whole region is released.
//!
//! ```text
//! Arena region (ARENA_SIZE bytes, any 8-byte alignment):
//! ┌─────┬────────┬────────┬────────┬ ─ ─ ─ ─ ─ ─ ─ ─ ┬─────┐
//! │ pad │ pool 0 │ pool 1 │ pool 2 │ untouched space │ pad │
//! └─────┴────────┴────────┴────────┴ ─ ─ ─ ─ ─ ─ ─ ─ ┴─────┘
//! ^ address                        ^ pool_address
//! ```
//!
//! If the region does not start on a pool boundary, the pools start at the
//! next boundary and the arena holds one pool less.

use core::ptr::{self, NonNull};

use crate::pool::{POOL_SIZE, POOL_SIZE_MASK, PoolPtr};

/// Size of the region backing one arena.
pub const ARENA_SIZE: usize = 256 << 10;
const _: () = assert!(ARENA_SIZE.is_multiple_of(POOL_SIZE));

/// Number of pools in an arena whose region is pool aligned.
pub const POOLS_PER_ARENA: usize = ARENA_SIZE / POOL_SIZE;

/// Index of an arena descriptor in the arena directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub(crate) struct ArenaIndex(u32);

impl ArenaIndex {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn get(self) -> u32 {
        self.0
    }

    pub(crate) const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Descriptor of one arena, stored in the arena directory.
///
/// A descriptor without an address is an unused directory slot, and its
/// `next` link then chains the directory's free-slot list.
#[derive(Debug)]
pub(crate) struct ArenaObject {
    address: Option<NonNull<u8>>,
    /// First byte of untouched pool space.
    pool_address: *mut u8,
    nfree_pools: usize,
    ntotal_pools: usize,
    free_pools: Option<PoolPtr>,
    /// Neighbors in the usable-arena list, or in the free-slot list.
    pub(crate) next: Option<ArenaIndex>,
    pub(crate) prev: Option<ArenaIndex>,
}

impl ArenaObject {
    /// Creates an unused descriptor chained before `next`.
    pub(crate) const fn unused(next: Option<ArenaIndex>) -> Self {
        Self {
            address: None,
            pool_address: ptr::null_mut(),
            nfree_pools: 0,
            ntotal_pools: 0,
            free_pools: None,
            next,
            prev: None,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.address.is_some()
    }

    /// Returns whether `addr` lies in this arena's region.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.address.is_some_and(|base| {
            let base = base.addr().get();
            base <= addr && addr - base < ARENA_SIZE
        })
    }

    pub(crate) fn nfree_pools(&self) -> usize {
        self.nfree_pools
    }

    pub(crate) fn ntotal_pools(&self) -> usize {
        self.ntotal_pools
    }

    pub(crate) fn is_fully_free(&self) -> bool {
        self.nfree_pools == self.ntotal_pools
    }

    /// Puts a freshly acquired region into this descriptor.
    ///
    /// # Safety
    ///
    /// `base` must be the start of a region of at least `ARENA_SIZE` bytes
    /// owned by the allocator.
    pub(crate) unsafe fn occupy(&mut self, base: NonNull<u8>) {
        debug_assert!(!self.is_live());

        let mut npools = POOLS_PER_ARENA;
        let mut pool_address = base.as_ptr();
        let excess = base.addr().get() & POOL_SIZE_MASK;
        if excess != 0 {
            npools -= 1;
            pool_address = unsafe { pool_address.add(POOL_SIZE - excess) };
        }

        self.address = Some(base);
        self.pool_address = pool_address;
        self.nfree_pools = npools;
        self.ntotal_pools = npools;
        self.free_pools = None;
    }

    /// Marks the descriptor unused and returns the region it held.
    pub(crate) fn vacate(&mut self) -> Option<NonNull<u8>> {
        let address = self.address.take()?;
        self.pool_address = ptr::null_mut();
        self.nfree_pools = 0;
        self.ntotal_pools = 0;
        self.free_pools = None;
        self.prev = None;
        Some(address)
    }

    /// Takes a free pool: a previously used one if any, otherwise a new one
    /// carved from the untouched space.
    ///
    /// `index` is this descriptor's index, recorded in carved pools.
    pub(crate) fn take_pool(&mut self, index: ArenaIndex) -> PoolPtr {
        assert!(self.nfree_pools > 0, "arena has no free pool");

        let pool = if let Some(pool) = self.free_pools {
            self.free_pools = pool.next_free_pool();
            pool
        } else {
            // with no reusable pool, every free pool is still untouched
            let page = self.pool_address;
            unsafe {
                self.pool_address = page.add(POOL_SIZE);
                PoolPtr::carve(NonNull::new_unchecked(page), index)
            }
        };
        self.nfree_pools -= 1;
        pool
    }

    /// Puts a pool with no block in use back on the free-pool list and
    /// returns the new number of free pools.
    pub(crate) fn return_pool(&mut self, pool: PoolPtr) -> usize {
        debug_assert!(self.nfree_pools < self.ntotal_pools);
        pool.set_next_free_pool(self.free_pools);
        self.free_pools = Some(pool);
        self.nfree_pools += 1;
        self.nfree_pools
    }
}
