//! custodian-index
//!
//! The indexing coordinator (C7): serializes heavy indexing work behind a
//! fair semaphore, throttles by minimum interval, and exposes a
//! counter-based (not semaphore-based) completion wait.

pub mod coordinator;

pub use coordinator::{CoordinateRequest, CoordinateResult, CoordinateStatus, IndexCoordinator, IndexerFn, IndexerFuture};
