//! [`AccessReporter`]: the typed, per-source facade transactions use to
//! report an object access and block on its lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AccessError, ConflictKind, Result};
use crate::key::{Key, ObjectIdentity};
use crate::lock::{Conflict, LockManager, LockMode};
use crate::locker::{Locker, TransactionId};

/// Reports accesses from a single named source (e.g. a particular
/// object store) against a shared [`LockManager`], translating
/// [`Conflict`] outcomes into [`AccessError`]s and aborting the owning
/// transaction on any non-`Granted` outcome.
///
/// Cheaply cloneable: holds only `Arc`s, matching the corpus's pattern
/// of handing out lightweight typed facades over shared core state.
pub struct AccessReporter<T> {
    source: Arc<str>,
    lock_manager: Arc<LockManager>,
    lockers: Arc<RwLock<HashMap<TransactionId, Arc<Locker>>>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Clone for AccessReporter<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            lock_manager: self.lock_manager.clone(),
            lockers: self.lockers.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: ObjectIdentity> AccessReporter<T> {
    pub(crate) fn new(
        source: String,
        lock_manager: Arc<LockManager>,
        lockers: Arc<RwLock<HashMap<TransactionId, Arc<Locker>>>>,
    ) -> Self {
        Self {
            source: source.into(),
            lock_manager,
            lockers,
            _marker: std::marker::PhantomData,
        }
    }

    /// Reports that `txn_id` is accessing `object_id` in `mode`,
    /// blocking until the lock is granted or a terminal conflict
    /// occurs. On any conflict the owning transaction is aborted (via
    /// [`crate::locker::Transaction::abort`]) and the corresponding
    /// [`AccessError`] is returned.
    pub fn report_object_access(
        &self,
        txn_id: TransactionId,
        object_id: T,
        mode: LockMode,
        description: Option<String>,
    ) -> Result<()> {
        let locker = self.locker_for(txn_id)?;
        let key = Key::new(self.source.clone(), object_id);

        if let Some(description) = description {
            locker.describe_key(&key, description);
        }

        let conflict = self
            .lock_manager
            .lock(&locker, &key, mode == LockMode::Write)?;

        match conflict {
            None => Ok(()),
            Some(conflict) => {
                let error = self.conflict_to_error(txn_id, &key, conflict);
                locker.transaction().abort(&error);
                Err(error)
            }
        }
    }

    /// Attaches a debug description to `object_id` for this
    /// transaction, without attempting to acquire a lock. First write
    /// wins if called more than once for the same key.
    pub fn set_object_description(
        &self,
        txn_id: TransactionId,
        object_id: T,
        description: String,
    ) -> Result<()> {
        let locker = self.locker_for(txn_id)?;
        let key = Key::new(self.source.clone(), object_id);
        locker.describe_key(&key, description);
        Ok(())
    }

    fn locker_for(&self, txn_id: TransactionId) -> Result<Arc<Locker>> {
        self.lockers.read().get(&txn_id).cloned().ok_or_else(|| {
            AccessError::illegal_state(format!("transaction {txn_id} is not registered"))
        })
    }

    fn conflict_to_error(&self, txn_id: TransactionId, key: &Key, conflict: Conflict) -> AccessError {
        match conflict {
            Conflict::Timeout(_) => AccessError::TransactionTimeout {
                txn_id,
                key: key.clone(),
            },
            Conflict::Denied(_) | Conflict::Blocked(_) => AccessError::TransactionConflict {
                txn_id,
                key: key.clone(),
                kind: ConflictKind::Denied,
            },
            Conflict::Deadlock => AccessError::TransactionConflict {
                txn_id,
                key: key.clone(),
                kind: ConflictKind::Deadlock,
            },
            Conflict::Interrupted => AccessError::TransactionInterrupted {
                txn_id,
                key: key.clone(),
            },
        }
    }
}
