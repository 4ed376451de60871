//! [`AccessCoordinator`]: transaction registry, lock manager ownership,
//! and conflict-to-abort translation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::AccessCoordinatorConfig;
use crate::error::{AccessError, Result};
use crate::key::ObjectIdentity;
use crate::lock::LockManager;
use crate::locker::{CompletionListener, Locker, Transaction, TransactionId};
use crate::profile::ProfileSink;
use crate::reporter::AccessReporter;

/// Owns the lock manager and the `txn -> Locker` registry, and
/// translates lock conflicts into transaction aborts plus profiling
/// records after each transaction completes.
///
/// Reads of the registry (reporting) are frequent; writes
/// (register/deregister) are rare, so a `parking_lot::RwLock` backs it
/// rather than a sharded map, unlike the lock table itself.
pub struct AccessCoordinator {
    lock_manager: Arc<LockManager>,
    lockers: Arc<RwLock<HashMap<TransactionId, Arc<Locker>>>>,
    sink: Arc<dyn ProfileSink>,
}

impl AccessCoordinator {
    pub fn new(config: AccessCoordinatorConfig, sink: Arc<dyn ProfileSink>) -> Self {
        Self {
            lock_manager: Arc::new(LockManager::new(config.num_key_maps, config.lock_timeout)),
            lockers: Arc::new(RwLock::new(HashMap::new())),
            sink,
        }
    }

    /// Creates an [`AccessReporter`] through which a given source (e.g.
    /// a particular object store) reports accesses against this
    /// coordinator's shared lock manager.
    pub fn register_access_source<T: ObjectIdentity>(&self, name: impl Into<String>) -> AccessReporter<T> {
        AccessReporter::new(name.into(), self.lock_manager.clone(), self.lockers.clone())
    }

    /// Registers a new transaction with the coordinator, creating its
    /// [`Locker`] and registering an after-completion listener on the
    /// transaction itself, which releases every lock it ever acquired
    /// and publishes an access-detail summary. The transaction
    /// implementation is responsible for firing that listener exactly
    /// once every participant has observed its final commit or abort
    /// outcome; this coordinator never releases locks on its own
    /// initiative.
    ///
    /// `try_count` must be `>= 1`; `requested_start_time` becomes the
    /// locker's `age` for deadlock victim selection.
    pub fn notify_new_transaction(
        &self,
        txn: Arc<dyn Transaction>,
        requested_start_time: u64,
        try_count: u32,
    ) -> Result<()> {
        if try_count < 1 {
            return Err(AccessError::illegal_argument("try_count must be >= 1"));
        }

        let txn_id = txn.id();
        let locker = Locker::new(txn.clone(), requested_start_time);

        let mut lockers = self.lockers.write();
        if lockers.contains_key(&txn_id) {
            return Err(AccessError::illegal_state(format!(
                "transaction {txn_id} is already registered"
            )));
        }
        lockers.insert(txn_id, locker);
        drop(lockers);

        txn.register_completion_listener(Arc::new(ReleaseOnComplete {
            lock_manager: self.lock_manager.clone(),
            lockers: self.lockers.clone(),
            sink: self.sink.clone(),
        }));
        tracing::debug!(%txn_id, try_count, "transaction registered");
        Ok(())
    }

    /// Always `None`: this core never tracks which transaction a caller
    /// conflicts with independently of a lock attempt's own return
    /// value — that information is only ever available at the moment
    /// of a `lock`/`lock_no_wait` call, via the returned `Conflict`.
    pub fn get_conflicting_transaction(&self, _txn_id: TransactionId) -> Option<TransactionId> {
        None
    }
}

/// The after-completion listener registered by [`AccessCoordinator::notify_new_transaction`].
/// Releases every lock the completing transaction acquired and publishes
/// its access-detail summary. Idempotent: firing it twice for the same
/// transaction id finds no registered locker on the second call.
struct ReleaseOnComplete {
    lock_manager: Arc<LockManager>,
    lockers: Arc<RwLock<HashMap<TransactionId, Arc<Locker>>>>,
    sink: Arc<dyn ProfileSink>,
}

impl CompletionListener for ReleaseOnComplete {
    fn on_transaction_complete(&self, txn_id: TransactionId) {
        let locker = self.lockers.write().remove(&txn_id);
        let Some(locker) = locker else {
            return;
        };

        self.lock_manager.release_all(&locker);

        let records = locker
            .requests_snapshot()
            .into_iter()
            .map(|request| crate::profile::AccessedObjectsDetail {
                source: request.key.source().to_string(),
                object_id: request.key.object_id_debug(),
                mode: request.mode(),
                description: locker.description_of(&request.key),
                conflict: match locker.conflict() {
                    Some(crate::lock::Conflict::Deadlock) => crate::profile::ConflictType::Deadlock,
                    Some(_) => crate::profile::ConflictType::AccessNotGranted,
                    None => crate::profile::ConflictType::None,
                },
            })
            .collect();

        self.sink.publish(txn_id, records);
        tracing::debug!(%txn_id, "transaction completed, locks released");
    }
}
