//! Application layer: the exactly-once machinery and the flows built on it.
//!
//! `LockRegistry` serializes callers per transaction id inside the process,
//! `TransactionHandle` mirrors that ownership in the persisted record,
//! `RateLimiter` gates outbound calls, and `Dispatcher` runs the monetary
//! actions through all three. `LockInspector` is the operator's escape valve
//! for locks left behind by a crashed holder.

pub mod dispatcher;
pub mod handle;
pub mod inspector;
pub mod lock_registry;
pub mod rate_limit;
