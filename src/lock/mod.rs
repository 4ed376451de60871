//! Sharded lock table, grant rule, deadlock detection, and the
//! [`LockManager`] façade that ties them together.

mod deadlock;
mod manager;
mod request;
mod shard;
mod state;

pub use deadlock::DeadlockDetector;
pub use manager::{Conflict, LockManager};
pub use request::{LockMode, LockRequest};
pub use shard::LockMap;
pub use state::Lock;
