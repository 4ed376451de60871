//! [`LockMode`] and [`LockRequest`] — a pending or held request against a
//! single [`Key`](crate::key::Key).

use std::fmt;
use std::sync::Arc;

use crate::key::Key;
use crate::locker::Locker;

/// Shared/exclusive lock mode.
///
/// A granted `Write` is incompatible with any other granted request; a
/// granted `Read` is compatible only with other `Read`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Read, LockMode::Read))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "READ"),
            LockMode::Write => write!(f, "WRITE"),
        }
    }
}

/// A pending or held request for a lock.
///
/// `upgrade` is set when the same locker already holds a `Read` on
/// `key` and now needs `Write`; upgrade requests are prioritized over
/// non-upgrade requests at the head of the waiter queue (see
/// [`crate::lock::state::Lock::insert_waiter`]).
#[derive(Clone)]
pub struct LockRequest {
    pub locker: Arc<Locker>,
    pub key: Key,
    pub for_write: bool,
    pub upgrade: bool,
}

impl LockRequest {
    pub fn new(locker: Arc<Locker>, key: Key, for_write: bool, upgrade: bool) -> Self {
        Self {
            locker,
            key,
            for_write,
            upgrade,
        }
    }

    pub fn mode(&self) -> LockMode {
        if self.for_write {
            LockMode::Write
        } else {
            LockMode::Read
        }
    }

    pub fn txn_id(&self) -> crate::locker::TransactionId {
        self.locker.txn_id()
    }
}

impl fmt::Debug for LockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRequest")
            .field("txn_id", &self.txn_id())
            .field("key", &self.key)
            .field("mode", &self.mode())
            .field("upgrade", &self.upgrade)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_compatible_with_read_only() {
        assert!(LockMode::Read.is_compatible_with(LockMode::Read));
        assert!(!LockMode::Read.is_compatible_with(LockMode::Write));
        assert!(!LockMode::Write.is_compatible_with(LockMode::Read));
        assert!(!LockMode::Write.is_compatible_with(LockMode::Write));
    }
}
