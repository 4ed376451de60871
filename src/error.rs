//! Crate-wide error taxonomy for the access-coordination core.
//!
//! Mirrors the two branches of the error model: programming errors
//! (bad arguments, misuse of an already-terminal locker) and contention
//! outcomes (timeout, denial, interruption, deadlock), each of which
//! always results in the requesting transaction being aborted by the
//! caller.

use thiserror::Error;

use crate::key::Key;
use crate::locker::TransactionId;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Which non-timeout, non-interrupt conflict produced a
/// [`AccessError::TransactionConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The lock was denied outright (no grant was possible and no wait
    /// was requested, or a no-wait probe failed to grant).
    Denied,
    /// This locker was chosen as a deadlock victim.
    Deadlock,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Denied => write!(f, "denied"),
            ConflictKind::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// Errors surfaced by the access-coordination core.
#[derive(Debug, Error)]
pub enum AccessError {
    /// A caller-supplied argument violates a documented precondition,
    /// e.g. `try_count < 1`.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The core was asked to do something invalid given its current
    /// state, e.g. a duplicate `notify_new_transaction`, a lock request
    /// from a locker already marked `Deadlock`, or a cross-thread
    /// `wait_for_lock`.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The transaction's lock wait hit its deadline
    /// (`min(now + lock.timeout, txn.creation_time + txn.timeout)`).
    #[error("transaction {txn_id} timed out waiting for a lock on {key}")]
    TransactionTimeout { txn_id: TransactionId, key: Key },

    /// The transaction's lock request resulted in a terminal conflict
    /// that is neither a timeout nor an interruption.
    #[error("transaction {txn_id} conflicted ({kind}) acquiring a lock on {key}")]
    TransactionConflict {
        txn_id: TransactionId,
        key: Key,
        kind: ConflictKind,
    },

    /// The waiting thread observed an explicit interrupt while blocked
    /// on a lock (see [`crate::locker::Locker::interrupt`]).
    #[error("transaction {txn_id} was interrupted waiting for a lock on {key}")]
    TransactionInterrupted { txn_id: TransactionId, key: Key },
}

impl AccessError {
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        AccessError::IllegalArgument(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        AccessError::IllegalState(message.into())
    }

    /// Returns the transaction id this error is associated with, if any.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            AccessError::TransactionTimeout { txn_id, .. } => Some(*txn_id),
            AccessError::TransactionConflict { txn_id, .. } => Some(*txn_id),
            AccessError::TransactionInterrupted { txn_id, .. } => Some(*txn_id),
            AccessError::IllegalArgument(_) | AccessError::IllegalState(_) => None,
        }
    }

    /// Returns true if this error is a contention outcome rather than a
    /// programming error (i.e. it always aborts the transaction).
    pub fn is_contention_outcome(&self) -> bool {
        matches!(
            self,
            AccessError::TransactionTimeout { .. }
                | AccessError::TransactionConflict { .. }
                | AccessError::TransactionInterrupted { .. }
        )
    }
}
