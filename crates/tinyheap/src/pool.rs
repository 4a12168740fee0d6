//! Page-sized pools of equal-size blocks.
//!
//! A pool is one [`POOL_SIZE`] page of an arena, dedicated to a single size
//! class at a time. Its header sits at the start of the page and the blocks
//! follow it:
//!
//! ```text
//! Pool page (POOL_SIZE bytes, POOL_SIZE aligned):
//! ┌────────────┬─────────┬─────────┬─────────┬ ─ ─ ─ ┬─────────┐
//! │ PoolHeader │ block 0 │ block 1 │ block 2 │       │ block n │
//! └────────────┴─────────┴─────────┴─────────┴ ─ ─ ─ ┴─────────┘
//! ^ page       ^ POOL_OVERHEAD               ^ next_offset
//! ```
//!
//! Blocks come from two sources:
//!
//! - **Free chain**: released blocks, threaded into a singly linked list
//!   through their first word.
//! - **Bump region**: blocks never handed out yet, carved by advancing
//!   `next_offset` until it passes `max_next_offset`.
//!
//! The free chain is never empty while the pool is linked into its size
//! class's list: when the chain runs dry the next block is carved into it
//! ahead of time. An empty chain therefore means "no block left" and is the
//! signal used on release to tell a full pool from a partially used one.
//!
//! # Safety Boundary
//!
//! Every reinterpretation of raw pool memory (the header and the free-chain
//! words) happens in this module. The rest of the crate manipulates pools
//! through [`PoolPtr`] handles only.

use core::ptr::NonNull;

use crate::{
    arena::ArenaIndex,
    size_class::{ALIGNMENT, SizeClass},
};

/// Size of a pool. Pools are aligned to their size.
pub const POOL_SIZE: usize = 4096;
pub(crate) const POOL_SIZE_MASK: usize = POOL_SIZE - 1;
const _: () = assert!(POOL_SIZE.is_power_of_two());

/// Offset of the first block of a pool.
pub(crate) const POOL_OVERHEAD: usize = size_of::<PoolHeader>().next_multiple_of(ALIGNMENT);
const _: () = assert!(POOL_OVERHEAD + 2 * crate::SMALL_REQUEST_THRESHOLD <= POOL_SIZE);

/// A link in a size class's pool list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    /// The sentinel of the list the pool belongs to.
    Head,
    Pool(PoolPtr),
}

/// The first word of a free block.
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}
const _: () = assert!(size_of::<FreeBlock>() <= ALIGNMENT);
const _: () = assert!(align_of::<FreeBlock>() <= ALIGNMENT);

#[repr(C)]
struct PoolHeader {
    /// Number of blocks currently handed out.
    count: u32,
    /// Index of the owning arena in the arena directory.
    arena: ArenaIndex,
    /// Head of the free chain.
    free_block: Option<NonNull<FreeBlock>>,
    next: Link,
    prev: Link,
    /// Next pool in the owning arena's free-pool list.
    next_free_pool: Option<PoolPtr>,
    /// `None` until the pool is first put into service.
    size_class: Option<SizeClass>,
    /// Offset of the next block of the bump region.
    next_offset: usize,
    /// Largest offset at which a whole block still fits.
    max_next_offset: usize,
}

/// Outcome of returning a block to its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// The pool still has blocks in use and was already in its class list.
    InUse,
    /// The pool was full, so it is not in its class list any more.
    Reopened,
    /// The pool has no block in use.
    Emptied,
}

/// Handle to the header of a pool inside a live arena.
///
/// A `PoolPtr` is only created for pages of an arena owned by the allocator,
/// and is dropped (or left unused) before that arena is released. All
/// accesses go through the allocator's `&mut self`, so a header is never
/// accessed concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolPtr(NonNull<PoolHeader>);

impl PoolPtr {
    /// Returns the pool that contains `block`.
    ///
    /// # Safety
    ///
    /// `block` must point into a pool of a live arena.
    pub(crate) unsafe fn containing(block: NonNull<u8>) -> Self {
        #[expect(clippy::cast_ptr_alignment)]
        let header = block
            .as_ptr()
            .map_addr(|addr| addr & !POOL_SIZE_MASK)
            .cast::<PoolHeader>();
        Self(unsafe { NonNull::new_unchecked(header) })
    }

    /// Writes a fresh header at `page`, without a size class.
    ///
    /// # Safety
    ///
    /// `page` must be a `POOL_SIZE` aligned, unused page of the live arena at
    /// index `arena`.
    pub(crate) unsafe fn carve(page: NonNull<u8>, arena: ArenaIndex) -> Self {
        #[expect(clippy::cast_ptr_alignment)]
        let header = page.as_ptr().cast::<PoolHeader>();
        assert!(header.is_aligned(), "pool page must be aligned");
        unsafe {
            header.write(PoolHeader {
                count: 0,
                arena,
                free_block: None,
                next: Link::Head,
                prev: Link::Head,
                next_free_pool: None,
                size_class: None,
                next_offset: 0,
                max_next_offset: 0,
            });
            Self(NonNull::new_unchecked(header))
        }
    }

    fn header(self) -> *mut PoolHeader {
        self.0.as_ptr()
    }

    fn block_at(self, offset: usize) -> NonNull<FreeBlock> {
        debug_assert!(offset >= POOL_OVERHEAD && offset < POOL_SIZE);
        // in bounds of the page by the assertion above
        unsafe { self.0.byte_add(offset).cast() }
    }

    /// Returns the address of the pool page.
    pub(crate) fn addr(self) -> usize {
        self.0.addr().get()
    }

    pub(crate) fn arena(self) -> ArenaIndex {
        unsafe { (*self.header()).arena }
    }

    /// Returns the size class the pool serves.
    ///
    /// # Panics
    ///
    /// Panics if the pool has never been put into service.
    pub(crate) fn size_class(self) -> SizeClass {
        match unsafe { (*self.header()).size_class } {
            Some(class) => class,
            None => unreachable!("pool at {:#x} has no size class", self.addr()),
        }
    }

    pub(crate) fn next(self) -> Link {
        unsafe { (*self.header()).next }
    }

    pub(crate) fn set_next(self, next: Link) {
        unsafe { (*self.header()).next = next }
    }

    pub(crate) fn prev(self) -> Link {
        unsafe { (*self.header()).prev }
    }

    pub(crate) fn set_prev(self, prev: Link) {
        unsafe { (*self.header()).prev = prev }
    }

    pub(crate) fn next_free_pool(self) -> Option<Self> {
        unsafe { (*self.header()).next_free_pool }
    }

    pub(crate) fn set_next_free_pool(self, next: Option<Self>) {
        unsafe { (*self.header()).next_free_pool = next }
    }

    #[cfg(test)]
    pub(crate) fn live_blocks(self) -> u32 {
        unsafe { (*self.header()).count }
    }

    /// Puts a pool just taken from its arena into service for `class` and
    /// returns its first block.
    ///
    /// A pool that served `class` before keeps its free chain; any other pool
    /// is reformatted: the first block is returned, the second becomes the
    /// only entry of the free chain and the rest is left to the bump region.
    pub(crate) fn init(self, class: SizeClass) -> NonNull<u8> {
        let header = self.header();
        unsafe {
            (*header).count = 1;
            if (*header).size_class == Some(class) {
                let Some(block) = (*header).free_block else {
                    unreachable!("reused pool at {:#x} has an empty free chain", self.addr());
                };
                (*header).free_block = block.read().next;
                return block.cast();
            }

            let size = class.block_size();
            (*header).size_class = Some(class);
            (*header).next_offset = POOL_OVERHEAD + 2 * size;
            (*header).max_next_offset = POOL_SIZE - size;

            let first = self.block_at(POOL_OVERHEAD);
            let second = self.block_at(POOL_OVERHEAD + size);
            second.write(FreeBlock { next: None });
            (*header).free_block = Some(second);
            first.cast()
        }
    }

    /// Hands out one block from a pool linked into its class list.
    ///
    /// The second element of the result is `true` when the pool has no block
    /// left afterwards; the caller must then unlink it from its class list.
    pub(crate) fn allocate_block(self) -> (NonNull<u8>, bool) {
        let header = self.header();
        unsafe {
            (*header).count += 1;
            let Some(block) = (*header).free_block else {
                unreachable!("pool at {:#x} in a class list has no free block", self.addr());
            };

            (*header).free_block = block.read().next;
            if (*header).free_block.is_some() {
                return (block.cast(), false);
            }

            if (*header).next_offset <= (*header).max_next_offset {
                let fresh = self.block_at((*header).next_offset);
                fresh.write(FreeBlock { next: None });
                (*header).free_block = Some(fresh);
                (*header).next_offset += self.size_class().block_size();
                return (block.cast(), false);
            }

            (block.cast(), true)
        }
    }

    /// Pushes `block` back onto the free chain.
    ///
    /// # Safety
    ///
    /// `block` must be a block of this pool that is currently handed out.
    pub(crate) unsafe fn release_block(self, block: NonNull<u8>) -> Released {
        let header = self.header();
        let block = block.cast::<FreeBlock>();
        unsafe {
            let last_free = (*header).free_block;
            block.write(FreeBlock { next: last_free });
            (*header).free_block = Some(block);

            debug_assert!((*header).count > 0);
            (*header).count -= 1;
            if last_free.is_none() {
                debug_assert!((*header).count > 0, "a pool holds more than one block");
                Released::Reopened
            } else if (*header).count == 0 {
                Released::Emptied
            } else {
                Released::InUse
            }
        }
    }
}

/// Number of blocks of `class` that fit in one pool.
#[cfg(test)]
pub(crate) const fn blocks_per_pool(class: SizeClass) -> usize {
    (POOL_SIZE - POOL_OVERHEAD) / class.block_size()
}
