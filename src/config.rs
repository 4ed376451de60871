//! Construction-time configuration for [`crate::coordinator::AccessCoordinator`].

use std::time::Duration;

/// Tunables for an [`crate::coordinator::AccessCoordinator`] instance.
///
/// There is no file/env parsing layer here — this core has no I/O
/// boundary of its own, so callers build this with a struct literal the
/// same way the corpus builds `LockManagerConfig`/`DeadlockDetectorConfig`.
#[derive(Debug, Clone, Copy)]
pub struct AccessCoordinatorConfig {
    /// Upper bound on how long a lock wait may run before timing out,
    /// independent of the waiting transaction's own timeout. `None`
    /// (the default) means "no override": the effective per-wait
    /// timeout is computed as `0.1 * transaction.timeout()`, floored at
    /// 1ms, since no single flat value fits every transaction's own
    /// timeout. The effective deadline is always `min(now +
    /// lock_timeout, txn.creation_time + txn.timeout)`.
    pub lock_timeout: Option<Duration>,
    /// Number of independently-mutexed shards backing the lock table.
    pub num_key_maps: usize,
}

impl Default for AccessCoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            num_key_maps: 8,
        }
    }
}
