//! Test support: scratch pages and an instrumented backing heap.

use core::{
    alloc::Layout,
    cell::{Cell, RefCell},
    ptr::NonNull,
};
use std::collections::HashSet;

use crate::{arena::ARENA_SIZE, backing::BackingAllocator, pool::POOL_SIZE, system::SystemHeap};

/// Runs `test_fn` with `count` consecutive, pool-aligned scratch pages.
pub(crate) fn with_test_pages<F>(count: usize, test_fn: F)
where
    F: FnOnce(&[NonNull<u8>]),
{
    unsafe {
        let layout = Layout::from_size_align(count * POOL_SIZE, POOL_SIZE).unwrap();
        let base = std::alloc::alloc(layout);
        assert!(!base.is_null());
        base.write_bytes(0x11, layout.size());
        let pages = (0..count)
            .map(|i| NonNull::new(base.add(i * POOL_SIZE)).unwrap())
            .collect::<Vec<_>>();
        test_fn(&pages);
        std::alloc::dealloc(base, layout);
    }
}

/// A [`SystemHeap`] that counts the calls it receives and can be told to
/// fail.
///
/// Regions of exactly `ARENA_SIZE` bytes are tracked separately so tests can
/// observe arenas being acquired and released.
#[derive(Debug, Default)]
pub(crate) struct CountingHeap {
    inner: SystemHeap,
    acquires: Cell<usize>,
    releases: Cell<usize>,
    resizes: Cell<usize>,
    arena_acquires: Cell<usize>,
    arena_releases: Cell<usize>,
    arenas: RefCell<HashSet<usize>>,
    fail_arenas: Cell<bool>,
    fail_all: Cell<bool>,
}

impl CountingHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquires(&self) -> usize {
        self.acquires.get()
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.get()
    }

    pub(crate) fn resizes(&self) -> usize {
        self.resizes.get()
    }

    pub(crate) fn arena_acquires(&self) -> usize {
        self.arena_acquires.get()
    }

    pub(crate) fn arena_releases(&self) -> usize {
        self.arena_releases.get()
    }

    /// Number of regions acquired and not released yet.
    pub(crate) fn live_regions(&self) -> usize {
        self.acquires() - self.releases()
    }

    /// Makes every `ARENA_SIZE` request fail.
    pub(crate) fn fail_arenas(&self, fail: bool) {
        self.fail_arenas.set(fail);
    }

    /// Makes every request fail.
    pub(crate) fn fail_all(&self, fail: bool) {
        self.fail_all.set(fail);
    }
}

unsafe impl BackingAllocator for CountingHeap {
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        if self.fail_all.get() || (size == ARENA_SIZE && self.fail_arenas.get()) {
            return None;
        }
        let ptr = self.inner.acquire(size)?;
        self.acquires.set(self.acquires.get() + 1);
        if size == ARENA_SIZE {
            self.arena_acquires.set(self.arena_acquires.get() + 1);
            self.arenas.borrow_mut().insert(ptr.addr().get());
        }
        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        self.releases.set(self.releases.get() + 1);
        if self.arenas.borrow_mut().remove(&ptr.addr().get()) {
            self.arena_releases.set(self.arena_releases.get() + 1);
        }
        unsafe { self.inner.release(ptr) }
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if self.fail_all.get() {
            return None;
        }
        self.resizes.set(self.resizes.get() + 1);
        unsafe { self.inner.resize(ptr, new_size) }
    }
}
