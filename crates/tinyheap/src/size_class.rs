//! Size classes and their per-class pool lists.
//!
//! Requests of `1..=SMALL_REQUEST_THRESHOLD` bytes are rounded up to the next
//! multiple of [`ALIGNMENT`], which gives [`NUM_SIZE_CLASSES`] classes:
//!
//! | request     | class | block size |
//! |-------------|-------|------------|
//! | 1..=8       | 0     | 8          |
//! | 9..=16      | 1     | 16         |
//! | ...         | ...   | ...        |
//! | 249..=256   | 31    | 256        |
//!
//! Each class owns a doubly linked list of the pools that currently have a
//! free block for it. The list is headed by a sentinel link which is both the
//! predecessor of the first pool and the successor of the last one, so linking
//! and unlinking never special-case an empty list.

use crate::pool::{Link, PoolPtr};

/// Alignment of every block, and the granularity of the size classes.
pub const ALIGNMENT: usize = 8;
const ALIGNMENT_SHIFT: u32 = ALIGNMENT.trailing_zeros();
const _: () = assert!(ALIGNMENT.is_power_of_two());

/// Largest request served from pools.
pub const SMALL_REQUEST_THRESHOLD: usize = 256;

/// Number of size classes.
pub const NUM_SIZE_CLASSES: usize = SMALL_REQUEST_THRESHOLD / ALIGNMENT;
const _: () = assert!(NUM_SIZE_CLASSES <= u8::MAX as usize + 1);

/// One of the fixed block sizes used for small requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(u8);

impl SizeClass {
    /// Returns the size class serving a request of `nbytes`.
    ///
    /// Returns `None` for zero-sized requests and for requests larger than
    /// [`SMALL_REQUEST_THRESHOLD`]; those go to the backing heap.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tinyheap::SizeClass;
    /// assert_eq!(SizeClass::for_request(1).unwrap().block_size(), 8);
    /// assert_eq!(SizeClass::for_request(9).unwrap().block_size(), 16);
    /// assert_eq!(SizeClass::for_request(256).unwrap().block_size(), 256);
    /// assert!(SizeClass::for_request(257).is_none());
    /// assert!(SizeClass::for_request(0).is_none());
    /// ```
    #[must_use]
    pub const fn for_request(nbytes: usize) -> Option<Self> {
        // wraps zero to usize::MAX, which fails the threshold check
        let offset = nbytes.wrapping_sub(1);
        if offset < SMALL_REQUEST_THRESHOLD {
            #[expect(clippy::cast_possible_truncation)]
            let index = (offset >> ALIGNMENT_SHIFT) as u8;
            Some(Self(index))
        } else {
            None
        }
    }

    /// Returns the size class with the given index, if it exists.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NUM_SIZE_CLASSES {
            #[expect(clippy::cast_possible_truncation)]
            let index = index as u8;
            Some(Self(index))
        } else {
            None
        }
    }

    /// Returns the index of this class, in `0..NUM_SIZE_CLASSES`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the size of the blocks handed out for this class.
    #[must_use]
    pub const fn block_size(self) -> usize {
        (self.0 as usize + 1) << ALIGNMENT_SHIFT
    }

    /// Iterates over all size classes, smallest first.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..NUM_SIZE_CLASSES).filter_map(Self::from_index)
    }
}

/// Heads of the per-class lists of pools with spare capacity.
#[derive(Debug)]
pub(crate) struct SizeClassTable {
    heads: [Link; NUM_SIZE_CLASSES],
}

impl SizeClassTable {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [Link::Head; NUM_SIZE_CLASSES],
        }
    }

    /// Returns the first pool with a free block of `class`.
    pub(crate) fn first(&self, class: SizeClass) -> Option<PoolPtr> {
        match self.heads[class.index()] {
            Link::Head => None,
            Link::Pool(pool) => Some(pool),
        }
    }

    /// Links `pool` at the front of `class`'s list.
    pub(crate) fn push_front(&mut self, class: SizeClass, pool: PoolPtr) {
        let next = self.heads[class.index()];
        pool.set_prev(Link::Head);
        pool.set_next(next);
        if let Link::Pool(next) = next {
            next.set_prev(Link::Pool(pool));
        }
        self.heads[class.index()] = Link::Pool(pool);
    }

    /// Removes `pool` from `class`'s list.
    ///
    /// `pool` must currently be linked into that list.
    pub(crate) fn unlink(&mut self, class: SizeClass, pool: PoolPtr) {
        let prev = pool.prev();
        let next = pool.next();
        match prev {
            Link::Head => self.heads[class.index()] = next,
            Link::Pool(prev) => prev.set_next(next),
        }
        if let Link::Pool(next) = next {
            next.set_prev(prev);
        }
    }

    #[cfg(test)]
    pub(crate) fn pools(&self, class: SizeClass) -> Vec<PoolPtr> {
        let mut pools = Vec::new();
        let mut link = self.heads[class.index()];
        while let Link::Pool(pool) = link {
            pools.push(pool);
            link = pool.next();
        }
        pools
    }
}
