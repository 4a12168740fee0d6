//! The arena directory and the usable-arena list.
//!
//! The directory is a table of [`ArenaObject`] descriptors that lives in the
//! backing heap. It only grows, starting at [`INITIAL_ARENA_OBJECTS`] slots
//! and doubling after that. Slots of released arenas go on a free-slot list and
//! are reused before the table grows again.
//!
//! Arenas with at least one free pool are also linked into the *usable-arena
//! list*, kept sorted by ascending number of free pools. New pools always come
//! from the head of the list, so allocations concentrate in the fullest arenas
//! and the emptiest ones get a chance to drain and be released.

use core::{ptr::NonNull, slice};

use snafu::OptionExt as _;

use crate::{
    arena::{ARENA_SIZE, ArenaIndex, ArenaObject},
    backing::BackingAllocator,
    error::{ArenaAllocSnafu, ArenaError, DirectoryAllocSnafu, DirectoryOverflowSnafu},
    pool::PoolPtr,
    size_class::ALIGNMENT,
};

/// Number of slots of the first directory table.
pub const INITIAL_ARENA_OBJECTS: u32 = 16;

const _: () = assert!(align_of::<ArenaObject>() <= ALIGNMENT);

#[derive(Debug)]
pub(crate) struct ArenaDirectory {
    slots: Option<NonNull<ArenaObject>>,
    capacity: u32,
    /// Head of the free-slot list.
    unused: Option<ArenaIndex>,
    /// Head of the usable-arena list.
    usable: Option<ArenaIndex>,
}

impl ArenaDirectory {
    pub(crate) const fn new() -> Self {
        Self {
            slots: None,
            capacity: 0,
            unused: None,
            usable: None,
        }
    }

    fn slots(&self) -> &[ArenaObject] {
        match self.slots {
            // every slot below `capacity` is initialized in `grow`
            Some(slots) => unsafe { slice::from_raw_parts(slots.as_ptr(), self.capacity as usize) },
            None => &[],
        }
    }

    fn slots_mut(&mut self) -> &mut [ArenaObject] {
        match self.slots {
            Some(slots) => unsafe {
                slice::from_raw_parts_mut(slots.as_ptr(), self.capacity as usize)
            },
            None => &mut [],
        }
    }

    fn slot(&self, index: ArenaIndex) -> &ArenaObject {
        &self.slots()[index.as_usize()]
    }

    fn slot_mut(&mut self, index: ArenaIndex) -> &mut ArenaObject {
        &mut self.slots_mut()[index.as_usize()]
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns whether `block` lies in the region of a live arena.
    ///
    /// This routes a pointer to the pools or to the backing heap; it does not
    /// check that the pointer is a block this allocator handed out.
    pub(crate) fn contains(&self, block: NonNull<u8>) -> bool {
        let addr = block.addr().get();
        self.slots().iter().any(|arena| arena.contains(addr))
    }

    /// Doubles the table and returns the first of the new slots, which are
    /// chained into the free-slot list.
    fn grow<B>(&mut self, backing: &B) -> Result<ArenaIndex, ArenaError>
    where
        B: BackingAllocator + ?Sized,
    {
        debug_assert!(self.unused.is_none());

        let old_capacity = self.capacity;
        let new_capacity = if old_capacity == 0 {
            INITIAL_ARENA_OBJECTS
        } else {
            old_capacity.checked_mul(2).context(DirectoryOverflowSnafu {
                capacity: old_capacity,
            })?
        };
        let bytes = (new_capacity as usize)
            .checked_mul(size_of::<ArenaObject>())
            .context(DirectoryOverflowSnafu {
                capacity: old_capacity,
            })?;

        let storage = match self.slots {
            None => backing.acquire(bytes),
            Some(slots) => unsafe { backing.resize(slots.cast(), bytes) },
        }
        .context(DirectoryAllocSnafu { bytes })?
        .cast::<ArenaObject>();

        for i in old_capacity..new_capacity {
            let next = (i + 1 < new_capacity).then_some(ArenaIndex::new(i + 1));
            unsafe { storage.add(i as usize).write(ArenaObject::unused(next)) };
        }

        log::debug!("arena directory grown from {old_capacity} to {new_capacity} slots");

        self.slots = Some(storage);
        self.capacity = new_capacity;
        Ok(ArenaIndex::new(old_capacity))
    }

    /// Acquires a new arena from the backing heap and puts it in a free slot.
    ///
    /// The arena is not linked into the usable-arena list.
    pub(crate) fn new_arena<B>(&mut self, backing: &B) -> Result<ArenaIndex, ArenaError>
    where
        B: BackingAllocator + ?Sized,
    {
        let index = match self.unused {
            Some(index) => index,
            None => self.grow(backing)?,
        };
        self.unused = self.slot(index).next;

        let Some(base) = backing.acquire(ARENA_SIZE) else {
            self.slot_mut(index).next = self.unused;
            self.unused = Some(index);
            return ArenaAllocSnafu { size: ARENA_SIZE }.fail();
        };

        let arena = self.slot_mut(index);
        unsafe { arena.occupy(base) };
        arena.next = None;
        arena.prev = None;
        log::trace!(
            "arena {} created at {base:p} with {} pools",
            index.get(),
            arena.ntotal_pools()
        );
        Ok(index)
    }

    /// Releases the region of a fully free arena and recycles its slot.
    ///
    /// The arena must not be linked into the usable-arena list.
    fn release_arena<B>(&mut self, index: ArenaIndex, backing: &B)
    where
        B: BackingAllocator + ?Sized,
    {
        let unused = self.unused;
        let arena = self.slot_mut(index);
        let Some(base) = arena.vacate() else {
            return;
        };
        arena.next = unused;
        self.unused = Some(index);

        unsafe { backing.release(base) };
        log::trace!("arena {} at {base:p} released", index.get());
    }

    /// Takes a free pool from the head of the usable-arena list, creating a
    /// new arena if the list is empty.
    pub(crate) fn take_pool<B>(&mut self, backing: &B) -> Result<PoolPtr, ArenaError>
    where
        B: BackingAllocator + ?Sized,
    {
        let index = match self.usable {
            Some(index) => index,
            None => {
                let index = self.new_arena(backing)?;
                self.usable = Some(index);
                index
            }
        };

        let arena = self.slot_mut(index);
        let pool = arena.take_pool(index);
        if arena.nfree_pools() == 0 {
            self.usable = arena.next.take();
            if let Some(next) = self.usable {
                self.slot_mut(next).prev = None;
            }
        }
        Ok(pool)
    }

    /// Returns a pool with no block in use to its arena.
    ///
    /// The arena is released if this was its last pool in use. Otherwise it
    /// is (re)positioned in the usable-arena list.
    pub(crate) fn reclaim_pool<B>(&mut self, pool: PoolPtr, backing: &B)
    where
        B: BackingAllocator + ?Sized,
    {
        let index = pool.arena();
        let arena = self.slot_mut(index);
        let nfree = arena.return_pool(pool);

        if arena.is_fully_free() {
            // an arena with a single pool was full, hence not usable
            if nfree > 1 {
                self.unlink_usable(index);
            }
            self.release_arena(index, backing);
        } else if nfree == 1 {
            // was full; one free pool is the fewest possible
            self.push_usable_front(index);
        } else {
            self.sift_usable(index);
        }
    }

    fn push_usable_front(&mut self, index: ArenaIndex) {
        let head = self.usable;
        let arena = self.slot_mut(index);
        arena.next = head;
        arena.prev = None;
        if let Some(head) = head {
            self.slot_mut(head).prev = Some(index);
        }
        self.usable = Some(index);
    }

    fn unlink_usable(&mut self, index: ArenaIndex) {
        let arena = self.slot_mut(index);
        let prev = arena.prev.take();
        let next = arena.next.take();
        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => self.usable = next,
        }
        if let Some(next) = next {
            self.slot_mut(next).prev = prev;
        }
    }

    /// Moves an arena whose free-pool count just grew forward in the
    /// usable-arena list until the list is sorted again.
    fn sift_usable(&mut self, index: ArenaIndex) {
        let nfree = self.slot(index).nfree_pools();
        let Some(next) = self.slot(index).next else {
            return;
        };
        if nfree <= self.slot(next).nfree_pools() {
            return;
        }

        self.unlink_usable(index);
        let mut prev = next;
        while let Some(next) = self.slot(prev).next {
            if nfree <= self.slot(next).nfree_pools() {
                break;
            }
            prev = next;
        }

        let next = self.slot(prev).next;
        let arena = self.slot_mut(index);
        arena.prev = Some(prev);
        arena.next = next;
        self.slot_mut(prev).next = Some(index);
        if let Some(next) = next {
            self.slot_mut(next).prev = Some(index);
        }
    }

    /// Releases every live arena and the directory table itself.
    pub(crate) fn release_all<B>(&mut self, backing: &B)
    where
        B: BackingAllocator + ?Sized,
    {
        for arena in self.slots_mut() {
            if let Some(base) = arena.vacate() {
                unsafe { backing.release(base) };
            }
        }
        if let Some(slots) = self.slots.take() {
            unsafe { backing.release(slots.cast()) };
        }
        *self = Self::new();
    }

    #[cfg(test)]
    pub(crate) fn live_arenas(&self) -> usize {
        self.slots().iter().filter(|arena| arena.is_live()).count()
    }

    #[cfg(test)]
    pub(crate) fn usable_arenas(&self) -> Vec<(ArenaIndex, usize)> {
        let mut arenas = Vec::new();
        let mut prev = None;
        let mut cursor = self.usable;
        while let Some(index) = cursor {
            let arena = self.slot(index);
            assert_eq!(arena.prev, prev, "broken back link at arena {index:?}");
            arenas.push((index, arena.nfree_pools()));
            prev = Some(index);
            cursor = arena.next;
        }
        arenas
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use core::ptr;

    use super::*;
    use crate::testing::CountingHeap;

    fn with_test_directory<F>(test_fn: F)
    where
        F: FnOnce(&mut ArenaDirectory, &CountingHeap),
    {
        let heap = CountingHeap::new();
        let mut directory = ArenaDirectory::new();
        test_fn(&mut directory, &heap);
        directory.release_all(&heap);
        assert_eq!(heap.live_regions(), 0);
    }

    #[test]
    fn test_new_arena_grows_directory() {
        with_test_directory(|directory, heap| {
            assert_eq!(directory.capacity(), 0);
            let index = directory.new_arena(heap).unwrap();
            assert_eq!(index, ArenaIndex::new(0));
            assert_eq!(directory.capacity(), INITIAL_ARENA_OBJECTS);
            assert_eq!(heap.arena_acquires(), 1);
            assert!(directory.slot(index).is_fully_free());
        });
    }

    #[test]
    fn test_directory_doubles() {
        with_test_directory(|directory, heap| {
            for i in 0..=INITIAL_ARENA_OBJECTS {
                assert_eq!(directory.new_arena(heap).unwrap(), ArenaIndex::new(i));
            }
            assert_eq!(directory.capacity(), 2 * INITIAL_ARENA_OBJECTS);
            assert_eq!(directory.live_arenas(), INITIAL_ARENA_OBJECTS as usize + 1);
            assert_eq!(heap.resizes(), 1);
        });
    }

    #[test]
    fn test_slots_are_reused() {
        with_test_directory(|directory, heap| {
            let index = directory.new_arena(heap).unwrap();
            directory.release_arena(index, heap);
            assert_eq!(heap.arena_releases(), 1);
            assert_eq!(directory.live_arenas(), 0);

            assert_eq!(directory.new_arena(heap).unwrap(), index);
            assert_eq!(directory.capacity(), INITIAL_ARENA_OBJECTS);
            assert_eq!(heap.resizes(), 0);
        });
    }

    #[test]
    fn test_arena_failure_returns_slot() {
        with_test_directory(|directory, heap| {
            heap.fail_arenas(true);
            let err = directory.new_arena(heap).unwrap_err();
            assert!(matches!(err, ArenaError::ArenaAlloc { .. }), "{err}");
            assert_eq!(directory.live_arenas(), 0);

            heap.fail_arenas(false);
            assert_eq!(directory.new_arena(heap).unwrap(), ArenaIndex::new(0));
        });
    }

    #[test]
    fn test_directory_failure() {
        with_test_directory(|directory, heap| {
            heap.fail_all(true);
            let err = directory.new_arena(heap).unwrap_err();
            assert!(matches!(err, ArenaError::DirectoryAlloc { .. }), "{err}");
            assert_eq!(directory.capacity(), 0);
        });
    }

    #[test]
    fn test_contains() {
        with_test_directory(|directory, heap| {
            let index = directory.new_arena(heap).unwrap();
            let pool = directory.slot_mut(index).take_pool(index);
            let addr = NonNull::new(ptr::with_exposed_provenance_mut(pool.addr())).unwrap();
            assert!(directory.contains(addr));

            let outside = heap.acquire(16).unwrap();
            assert!(!directory.contains(outside));
            unsafe { heap.release(outside) };
        });
    }

    #[test]
    fn test_take_pool_drains_head() {
        with_test_directory(|directory, heap| {
            let first = directory.take_pool(heap).unwrap();
            let index = first.arena();
            let total = directory.slot(index).ntotal_pools();
            assert_eq!(directory.usable_arenas(), [(index, total - 1)]);

            for _ in 1..total {
                directory.take_pool(heap).unwrap();
            }
            assert!(directory.usable_arenas().is_empty());

            // the next pool needs a second arena
            let pool = directory.take_pool(heap).unwrap();
            assert_ne!(pool.arena(), index);
            assert_eq!(heap.arena_acquires(), 2);
        });
    }

    #[test]
    fn test_reclaim_keeps_usable_list_sorted() {
        with_test_directory(|directory, heap| {
            // three arenas with 1, 2 and 3 free pools
            let mut taken = Vec::new();
            let mut arenas = Vec::new();
            for nfree in 1..=3 {
                let index = directory.new_arena(heap).unwrap();
                let total = directory.slot(index).ntotal_pools();
                let pools = (0..total - nfree)
                    .map(|_| directory.slot_mut(index).take_pool(index))
                    .collect::<Vec<_>>();
                taken.push(pools);
                arenas.push(index);
            }
            let [a, b, c] = [arenas[0], arenas[1], arenas[2]];
            directory.push_usable_front(c);
            directory.push_usable_front(b);
            directory.push_usable_front(a);
            assert_eq!(directory.usable_arenas(), [(a, 1), (b, 2), (c, 3)]);

            // ties stay in place
            directory.reclaim_pool(taken[0].pop().unwrap(), heap);
            assert_eq!(directory.usable_arenas(), [(a, 2), (b, 2), (c, 3)]);

            directory.reclaim_pool(taken[0].pop().unwrap(), heap);
            assert_eq!(directory.usable_arenas(), [(b, 2), (a, 3), (c, 3)]);

            directory.reclaim_pool(taken[0].pop().unwrap(), heap);
            assert_eq!(directory.usable_arenas(), [(b, 2), (c, 3), (a, 4)]);
        });
    }

    #[test]
    fn test_reclaim_full_arena_goes_first() {
        with_test_directory(|directory, heap| {
            let a = directory.new_arena(heap).unwrap();
            let total = directory.slot(a).ntotal_pools();
            let mut pools = (0..total)
                .map(|_| directory.slot_mut(a).take_pool(a))
                .collect::<Vec<_>>();
            let b = directory.new_arena(heap).unwrap();
            directory.push_usable_front(b);
            let b_total = directory.slot(b).ntotal_pools();

            directory.reclaim_pool(pools.pop().unwrap(), heap);
            assert_eq!(directory.usable_arenas(), [(a, 1), (b, b_total)]);
        });
    }

    #[test]
    fn test_reclaim_releases_empty_arena() {
        with_test_directory(|directory, heap| {
            let mut pools = (0..3)
                .map(|_| directory.take_pool(heap).unwrap())
                .collect::<Vec<_>>();
            let index = pools[0].arena();
            let total = directory.slot(index).ntotal_pools();
            assert_eq!(directory.usable_arenas(), [(index, total - 3)]);

            while let Some(pool) = pools.pop() {
                directory.reclaim_pool(pool, heap);
            }
            assert_eq!(heap.arena_releases(), 1);
            assert!(directory.usable_arenas().is_empty());
            assert!(!directory.slot(index).is_live());

            // the released slot is handed out again
            assert_eq!(directory.new_arena(heap).unwrap(), index);
        });
    }
}
