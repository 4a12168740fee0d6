//! Errors raised while putting a new arena into service.

use snafu::{Location, Snafu};

/// Reasons a new arena could not be created.
///
/// These never reach the caller of
/// [`allocate`](crate::SmallObjectAllocator::allocate): the request that
/// needed the arena is served by the backing heap instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ArenaError {
    #[snafu(display("arena directory cannot grow beyond {capacity} slots"))]
    DirectoryOverflow {
        capacity: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to allocate {bytes} bytes for the arena directory"))]
    DirectoryAlloc {
        bytes: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to allocate a {size} byte arena"))]
    ArenaAlloc {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
