//! The general-purpose heap behind the pools.
//!
//! Arenas, the arena directory and every request the pools do not serve
//! (anything above [`SMALL_REQUEST_THRESHOLD`](crate::SMALL_REQUEST_THRESHOLD)
//! bytes, or anything at all once no arena can be created) come from a
//! [`BackingAllocator`]. The interface is the classic `malloc` / `free` /
//! `realloc` triple: regions are identified by their start pointer alone.

use core::ptr::NonNull;

/// A general-purpose heap addressed by pointer only.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - A region returned by `acquire` or `resize` is valid for reads and writes
///   of the requested size, aligned to at least
///   [`ALIGNMENT`](crate::ALIGNMENT) bytes, and not handed out again until it
///   is released.
/// - `resize` preserves the leading `min(old size, new size)` bytes, and on
///   failure leaves the original region allocated and unchanged.
pub unsafe trait BackingAllocator {
    /// Acquires a region of `size` bytes.
    ///
    /// Returns `None` when the heap is exhausted.
    fn acquire(&self, size: usize) -> Option<NonNull<u8>>;

    /// Releases a region previously returned by [`acquire`](Self::acquire)
    /// or [`resize`](Self::resize).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not released since.
    unsafe fn release(&self, ptr: NonNull<u8>);

    /// Resizes a region to `new_size` bytes, possibly moving it.
    ///
    /// Returns `None` when the heap is exhausted, in which case `ptr` is still
    /// valid.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not released since.
    unsafe fn resize(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>>;
}

unsafe impl<B> BackingAllocator for &B
where
    B: BackingAllocator + ?Sized,
{
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).acquire(size)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        unsafe { (**self).release(ptr) }
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        unsafe { (**self).resize(ptr, new_size) }
    }
}
