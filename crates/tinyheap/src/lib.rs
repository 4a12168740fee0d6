//! A pooled small-object allocator front-end.
//!
//! `tinyheap` serves requests of up to [`SMALL_REQUEST_THRESHOLD`] bytes from
//! page-sized pools of equal-size blocks and hands everything else to a
//! general-purpose *backing heap*. It is meant for workloads dominated by tiny,
//! short-lived allocations (the cells and nodes of an embedded language
//! runtime, for instance) where the bookkeeping of a general-purpose allocator
//! costs more than the allocation itself.
//!
//! # Memory Organization
//!
//! ```text
//! backing heap
//!  └─ arena (ARENA_SIZE bytes, obtained and released as a unit)
//!      └─ pool (POOL_SIZE bytes, page aligned, one size class at a time)
//!          └─ block (8..=256 bytes, a multiple of ALIGNMENT)
//! ```
//!
//! - **Size classes**: a request of `n` bytes is rounded up to the next
//!   multiple of 8, giving 32 classes. Each class keeps a list of pools that
//!   still have a free block.
//! - **Pools**: a pool hands out blocks from its free chain first and carves
//!   never-used blocks by bumping an offset second.
//! - **Arenas**: an arena is split into pools on demand. When every pool of an
//!   arena is free again, the arena goes back to the backing heap.
//! - **Arena directory**: a growable table of arena descriptors whose slots
//!   are recycled. Arenas with free pools are kept in a list sorted by how
//!   many free pools they have, and new pools come from the fullest one.
//!
//! # Usage
//!
//! ```rust
//! use tinyheap::{SmallObjectAllocator, SystemHeap};
//!
//! let mut heap = SmallObjectAllocator::new(SystemHeap);
//!
//! // Small requests are served from pools.
//! let cell = heap.allocate(24).unwrap();
//! // Large requests go straight to the backing heap.
//! let buffer = heap.allocate(4096).unwrap();
//!
//! unsafe {
//!     cell.as_ptr().write_bytes(0xab, 24);
//!     let cell = heap.resize(cell.as_ptr(), 48).unwrap();
//!     assert_eq!(cell.as_ptr().read(), 0xab);
//!
//!     heap.release(cell.as_ptr());
//!     heap.release(buffer.as_ptr());
//! }
//! ```
//!
//! # Thread Safety
//!
//! [`SmallObjectAllocator`] is `Send` but not `Sync`: every operation takes
//! `&mut self`. [`LockedAllocator`] wraps it in a single spin lock so it can be
//! shared, and with the `std` feature it implements
//! [`GlobalAlloc`](core::alloc::GlobalAlloc) on top of [`SystemHeap`].
//!
//! # Features
//!
//! - `std` (default): enables [`SystemHeap`] and the `GlobalAlloc` adapter.
//!   Without it the crate is `no_std` and needs no `alloc`.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod allocator;
pub mod arena;
pub mod backing;
mod directory;
pub mod error;
pub mod locked;
pub mod pool;
pub mod size_class;
#[cfg(any(test, feature = "std"))]
pub mod system;
#[cfg(test)]
mod testing;

pub use self::{
    allocator::SmallObjectAllocator,
    backing::BackingAllocator,
    error::ArenaError,
    locked::LockedAllocator,
    size_class::{ALIGNMENT, NUM_SIZE_CLASSES, SMALL_REQUEST_THRESHOLD, SizeClass},
};
#[cfg(any(test, feature = "std"))]
pub use self::system::SystemHeap;
