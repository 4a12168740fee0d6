//! A [`SmallObjectAllocator`] behind a spin lock.

use core::{fmt, ptr::NonNull};

use spin::Mutex;

use crate::{allocator::SmallObjectAllocator, backing::BackingAllocator};

/// A [`SmallObjectAllocator`] that can be shared between threads.
///
/// Every operation takes one global lock, held for the whole call.
pub struct LockedAllocator<B>
where
    B: BackingAllocator,
{
    inner: Mutex<SmallObjectAllocator<B>>,
}

impl<B> LockedAllocator<B>
where
    B: BackingAllocator,
{
    #[must_use]
    pub const fn new(backing: B) -> Self {
        Self {
            inner: Mutex::new(SmallObjectAllocator::new(backing)),
        }
    }

    /// See [`SmallObjectAllocator::allocate`].
    pub fn allocate(&self, nbytes: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(nbytes)
    }

    /// See [`SmallObjectAllocator::release`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator and not
    /// released since.
    pub unsafe fn release(&self, ptr: *mut u8) {
        unsafe { self.inner.lock().release(ptr) }
    }

    /// See [`SmallObjectAllocator::resize`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator and not
    /// released since.
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        unsafe { self.inner.lock().resize(ptr, new_size) }
    }

    /// See [`SmallObjectAllocator::owns`].
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.inner.lock().owns(ptr)
    }

    /// Returns the inner allocator.
    #[must_use]
    pub fn into_inner(self) -> SmallObjectAllocator<B> {
        self.inner.into_inner()
    }
}

impl<B> fmt::Debug for LockedAllocator<B>
where
    B: BackingAllocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedAllocator").finish_non_exhaustive()
    }
}
