//! The small-object allocator front-end.

use core::{cmp, ptr::NonNull};

use crate::{
    backing::BackingAllocator,
    directory::ArenaDirectory,
    pool::{PoolPtr, Released},
    size_class::{SizeClass, SizeClassTable},
};

/// An allocator serving small requests from pools and everything else from a
/// backing heap.
///
/// Requests of `1..=SMALL_REQUEST_THRESHOLD` bytes get a block of their size
/// class. Zero-byte and larger requests, and every request made while no
/// arena can be obtained, are passed to the backing heap.
///
/// Every block is aligned to [`ALIGNMENT`](crate::ALIGNMENT) bytes.
#[derive(Debug)]
pub struct SmallObjectAllocator<B>
where
    B: BackingAllocator,
{
    classes: SizeClassTable,
    arenas: ArenaDirectory,
    backing: B,
}

// Pool and arena pointers all refer to memory owned by the allocator.
unsafe impl<B> Send for SmallObjectAllocator<B> where B: BackingAllocator + Send {}

impl<B> SmallObjectAllocator<B>
where
    B: BackingAllocator,
{
    /// Creates an allocator that owns no memory yet.
    ///
    /// Nothing is requested from `backing` until the first allocation.
    #[must_use]
    pub const fn new(backing: B) -> Self {
        Self {
            classes: SizeClassTable::new(),
            arenas: ArenaDirectory::new(),
            backing,
        }
    }

    /// Returns the backing heap.
    #[must_use]
    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// Allocates `nbytes` bytes.
    ///
    /// Returns `None` only if the backing heap is exhausted.
    pub fn allocate(&mut self, nbytes: usize) -> Option<NonNull<u8>> {
        if let Some(class) = SizeClass::for_request(nbytes)
            && let Some(block) = self.allocate_small(class)
        {
            return Some(block);
        }
        self.backing.acquire(nbytes)
    }

    fn allocate_small(&mut self, class: SizeClass) -> Option<NonNull<u8>> {
        if let Some(pool) = self.classes.first(class) {
            let (block, full) = pool.allocate_block();
            if full {
                self.classes.unlink(class, pool);
            }
            return Some(block);
        }

        let pool = match self.arenas.take_pool(&self.backing) {
            Ok(pool) => pool,
            Err(err) => {
                log::debug!(
                    "serving {} byte block from the backing heap: {err}",
                    class.block_size()
                );
                return None;
            }
        };
        self.classes.push_front(class, pool);
        Some(pool.init(class))
    }

    /// Releases a block.
    ///
    /// Releasing a null pointer does nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator and not
    /// released since.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };

        if !self.arenas.contains(block) {
            unsafe { self.backing.release(block) };
            return;
        }

        let pool = unsafe { PoolPtr::containing(block) };
        let class = pool.size_class();
        match unsafe { pool.release_block(block) } {
            Released::InUse => {}
            Released::Reopened => self.classes.push_front(class, pool),
            Released::Emptied => {
                self.classes.unlink(class, pool);
                self.arenas.reclaim_pool(pool, &self.backing);
            }
        }
    }

    /// Resizes a block to `new_size` bytes, possibly moving it.
    ///
    /// The leading `min(old size, new_size)` bytes are preserved. Resizing a
    /// null pointer is the same as [`allocate`](Self::allocate).
    ///
    /// Pool blocks are always moved to a fresh allocation. On failure `None`
    /// is returned and the original block is left allocated and unchanged.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator and not
    /// released since.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(block) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };

        if !self.arenas.contains(block) {
            return unsafe { self.backing.resize(block, new_size) };
        }

        let old_size = unsafe { PoolPtr::containing(block) }
            .size_class()
            .block_size();
        let new_block = self.allocate(new_size)?;
        unsafe {
            new_block.copy_from_nonoverlapping(block, cmp::min(old_size, new_size));
            self.release(block.as_ptr());
        }
        Some(new_block)
    }

    /// Returns whether `ptr` lies in one of the allocator's arenas.
    ///
    /// A `true` result does not mean `ptr` is a live block.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        NonNull::new(ptr.cast_mut()).is_some_and(|ptr| self.arenas.contains(ptr))
    }
}

impl<B> Drop for SmallObjectAllocator<B>
where
    B: BackingAllocator,
{
    fn drop(&mut self) {
        self.arenas.release_all(&self.backing);
    }
}
