//! Backing heap and global allocator support on top of the system allocator.
//!
//! Available with the `std` feature.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    ptr::{self, NonNull},
};

use crate::{backing::BackingAllocator, locked::LockedAllocator, size_class::ALIGNMENT};

const HEADER_SIZE: usize = 16;
const HEADER_ALIGN: usize = 16;
const _: () = assert!(size_of::<usize>() <= HEADER_SIZE);

/// A [`BackingAllocator`] over [`std::alloc::System`].
///
/// Each region is prefixed with a small header recording its size, so it can
/// be released or resized from its pointer alone. Regions are 16-byte
/// aligned.
///
/// `SystemHeap` always uses the system allocator directly, so it stays usable
/// when the small-object allocator is installed as the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

impl SystemHeap {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.checked_add(HEADER_SIZE)?, HEADER_ALIGN).ok()
    }

    /// Records `size` in the header at `base` and returns the user region.
    unsafe fn finish(base: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let base = NonNull::new(base)?;
        unsafe {
            base.cast::<usize>().write(size);
            Some(base.add(HEADER_SIZE))
        }
    }

    /// Returns the start and layout of the allocation behind `ptr`.
    unsafe fn header(ptr: NonNull<u8>) -> (NonNull<u8>, Layout) {
        unsafe {
            let base = ptr.sub(HEADER_SIZE);
            let size = base.cast::<usize>().read();
            let layout = Layout::from_size_align_unchecked(size + HEADER_SIZE, HEADER_ALIGN);
            (base, layout)
        }
    }
}

unsafe impl BackingAllocator for SystemHeap {
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        unsafe { Self::finish(System.alloc(layout), size) }
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        unsafe {
            let (base, layout) = Self::header(ptr);
            System.dealloc(base.as_ptr(), layout);
        }
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let new_layout = Self::layout(new_size)?;
        unsafe {
            let (base, layout) = Self::header(ptr);
            let base = System.realloc(base.as_ptr(), layout, new_layout.size());
            Self::finish(base, new_size)
        }
    }
}

/// Global allocator support.
///
/// Layouts aligned to at most [`ALIGNMENT`] bytes go through the small-object
/// allocator. Over-aligned layouts are passed to [`System`] unchanged; the
/// layout given back on deallocation routes them there again.
///
/// Arena creation and release are logged through the `log` facade, so the
/// installed logger must not allocate.
///
/// ```rust,no_run
/// use tinyheap::{LockedAllocator, SystemHeap};
///
/// #[global_allocator]
/// static ALLOCATOR: LockedAllocator<SystemHeap> = LockedAllocator::new(SystemHeap);
///
/// fn main() {
///     let cells = vec![0_u64; 16];
///     assert_eq!(cells.len(), 16);
/// }
/// ```
unsafe impl GlobalAlloc for LockedAllocator<SystemHeap> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return unsafe { System.alloc(layout) };
        }
        self.allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() > ALIGNMENT {
            unsafe { System.dealloc(ptr, layout) };
            return;
        }
        unsafe { self.release(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return unsafe { System.realloc(ptr, layout, new_size) };
        }
        unsafe { self.resize(ptr, new_size) }.map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}
