//! [`LockManager`]: the public lock / lock-no-wait / wait-for-lock /
//! release operations, orchestrating shards and blocked waiters.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AccessError, Result};
use crate::key::Key;
use crate::locker::{Locker, TransactionId, WaitOutcome};

use super::deadlock::DeadlockDetector;
use super::request::LockRequest;
use super::shard::LockMap;

/// Outcome of a lock attempt that did not result in an immediate,
/// uncontested grant. `None` (not `Conflict`) represents the granted
/// case at the API boundary; `Conflict` covers every other terminal or
/// transient outcome, each carrying the foreign locker it conflicted
/// with where one is known, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Returned only by `lock_no_wait` when the request could not be
    /// granted immediately; the caller must follow up with
    /// `wait_for_lock`.
    Blocked(Option<TransactionId>),
    /// The wait deadline (`min(lock.timeout, txn.timeout)`) elapsed.
    Timeout(Option<TransactionId>),
    /// Reserved for deny-on-sight policies; unused by the FIFO grant
    /// rule itself but part of the taxonomy callers must handle (see
    /// `AccessReporter::report_object_access`).
    Denied(Option<TransactionId>),
    /// The waiting thread was interrupted (see [`Locker::interrupt`]).
    Interrupted,
    /// This locker was chosen as the deadlock victim.
    Deadlock,
}

impl Conflict {
    pub fn conflicting_locker(&self) -> Option<TransactionId> {
        match self {
            Conflict::Blocked(l) | Conflict::Timeout(l) | Conflict::Denied(l) => *l,
            Conflict::Interrupted | Conflict::Deadlock => None,
        }
    }
}

/// Lock / lock-no-wait / wait-for-lock / release, orchestrating the
/// sharded key map and the deadlock detector.
pub struct LockManager {
    map: LockMap,
    lock_timeout: Option<Duration>,
}

impl LockManager {
    pub fn new(num_key_maps: usize, lock_timeout: Option<Duration>) -> Self {
        Self {
            map: LockMap::new(num_key_maps),
            lock_timeout,
        }
    }

    /// Blocking lock acquisition. `Ok(None)` means granted; `Ok(Some(_))`
    /// carries a terminal conflict.
    pub fn lock(&self, locker: &Arc<Locker>, key: &Key, for_write: bool) -> Result<Option<Conflict>> {
        match self.attempt(locker, key, for_write)? {
            Attempt::Granted => Ok(None),
            Attempt::MustWait => Ok(self.wait_for_lock(locker)?),
        }
    }

    /// Non-blocking probe. Returns `Ok(Some(Conflict::Blocked(_)))` if the
    /// request could not be granted immediately; the caller must later
    /// call [`LockManager::wait_for_lock`] to complete it.
    pub fn lock_no_wait(
        &self,
        locker: &Arc<Locker>,
        key: &Key,
        for_write: bool,
    ) -> Result<Option<Conflict>> {
        match self.attempt(locker, key, for_write)? {
            Attempt::Granted => Ok(None),
            Attempt::MustWait => {
                let blocking = self.map.peek(key, |lock| {
                    lock.and_then(|l| {
                        l.waiters()
                            .find(|w| w.txn_id() == locker.txn_id())
                            .and_then(|w| l.blocking_locker(w))
                    })
                });
                Ok(Some(Conflict::Blocked(blocking)))
            }
        }
    }

    /// Completes a wait started by `lock` or `lock_no_wait`. Returns
    /// `Ok(None)` immediately if the locker has no outstanding wait.
    pub fn wait_for_lock(&self, locker: &Arc<Locker>) -> Result<Option<Conflict>> {
        if locker.waiting_for().is_none() {
            // Either nothing was ever queued, or the wait already
            // resolved (e.g. the deadlock detector declared this very
            // locker a victim before `attempt` returned) and cleared
            // `waiting_for` without this thread ever calling
            // `wait_until`. Either way the outcome already lives in
            // `conflict()`.
            return Ok(locker.conflict());
        }

        match locker.wait_until(now_ms) {
            WaitOutcome::Granted => {
                tracing::debug!(txn = %locker.txn_id(), "lock granted after wait");
                Ok(None)
            }
            WaitOutcome::Conflict(conflict) => {
                tracing::debug!(txn = %locker.txn_id(), ?conflict, "lock wait ended in conflict");
                Ok(Some(conflict))
            }
            WaitOutcome::DeadlineExpired => {
                let request = locker
                    .waiting_for()
                    .expect("DeadlineExpired implies a live wait");
                let blocking = self
                    .map
                    .peek(&request.key, |lock| lock.and_then(|l| l.blocking_locker(&request)));
                self.map
                    .with_lock_mut(&request.key, |lock| lock.remove_waiter(locker.txn_id()));
                locker.signal_conflict(Conflict::Timeout(blocking));
                tracing::warn!(txn = %locker.txn_id(), key = %request.key, "lock wait timed out");
                Ok(Some(Conflict::Timeout(blocking)))
            }
            WaitOutcome::NothingToWaitFor => Ok(None),
            WaitOutcome::WrongThread => Err(AccessError::illegal_state(
                "wait_for_lock called from a different thread than the one that blocked",
            )),
        }
    }

    /// Releases any grant this locker holds on `key`, re-running the
    /// grant rule and waking every waiter newly granted. A missing
    /// grant is a no-op — release is infallible by design.
    pub fn release_lock(&self, locker: &Arc<Locker>, key: &Key) {
        let newly_granted = self.map.with_lock_mut(key, |lock| {
            if lock.remove_granted(locker.txn_id()) {
                lock.run_grant_rule()
            } else {
                Vec::new()
            }
        });
        for request in newly_granted {
            tracing::trace!(txn = %request.txn_id(), key = %key, "lock granted on release");
            request.locker.signal_granted();
        }
    }

    /// Releases every key this locker has ever requested. Called once,
    /// from the coordinator's after-completion listener.
    pub fn release_all(&self, locker: &Arc<Locker>) {
        let mut seen = std::collections::HashSet::new();
        for request in locker.requests_snapshot() {
            if seen.insert(request.key.clone()) {
                self.release_lock(locker, &request.key);
            }
        }
    }

    fn attempt(&self, locker: &Arc<Locker>, key: &Key, for_write: bool) -> Result<Attempt> {
        if locker.has_deadlocked() {
            return Err(AccessError::illegal_state(format!(
                "transaction {} already observed a deadlock and may not acquire further locks",
                locker.txn_id()
            )));
        }

        let already_held = self
            .map
            .peek(key, |lock| lock.and_then(|l| l.granted_mode_for(locker.txn_id())));

        let requested_mode = if for_write {
            super::request::LockMode::Write
        } else {
            super::request::LockMode::Read
        };

        if let Some(held) = already_held {
            if held == super::request::LockMode::Write || held == requested_mode {
                return Ok(Attempt::Granted);
            }
        }

        let is_upgrade = for_write && already_held == Some(super::request::LockMode::Read);

        let request = LockRequest::new(locker.clone(), key.clone(), for_write, is_upgrade);

        let (granted_now, deadline_ms) = self.map.with_lock_mut(key, |lock| {
            if lock.can_grant_immediately(&request) {
                lock.grant(request.clone());
                (true, 0)
            } else {
                lock.insert_waiter(request.clone());
                (false, locker.wait_deadline_ms(now_ms(), self.lock_timeout))
            }
        });

        if granted_now {
            locker.record_request(request);
            tracing::debug!(txn = %locker.txn_id(), key = %key, "lock granted immediately");
            return Ok(Attempt::Granted);
        }

        locker.record_request(request.clone());
        locker.begin_wait(request, deadline_ms);
        tracing::debug!(txn = %locker.txn_id(), key = %key, "lock blocked, running deadlock detection");

        if let Some(victim) = DeadlockDetector::find_victim(&self.map, locker) {
            tracing::warn!(victim = %victim.txn_id(), "deadlock detected, victim selected");
            if let Some(victim_request) = victim.waiting_for() {
                self.map
                    .with_lock_mut(&victim_request.key, |lock| lock.remove_waiter(victim.txn_id()));
            }
            victim.signal_conflict(Conflict::Deadlock);
        }

        Ok(Attempt::MustWait)
    }
}

enum Attempt {
    Granted,
    MustWait,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locker::Transaction;
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeTxn {
        id: u64,
        creation_time_ms: u64,
        timeout: Duration,
    }

    impl Transaction for FakeTxn {
        fn id(&self) -> TransactionId {
            TransactionId::new(self.id)
        }
        fn creation_time_ms(&self) -> u64 {
            self.creation_time_ms
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn abort(&self, _error: &AccessError) {}
        fn register_completion_listener(&self, _listener: Arc<dyn crate::locker::CompletionListener>) {}
    }

    fn locker(id: u64, timeout: Duration) -> Arc<Locker> {
        Locker::new(
            Arc::new(FakeTxn {
                id,
                creation_time_ms: now_ms(),
                timeout,
            }),
            id,
        )
    }

    #[test]
    fn read_sharing_both_grant() {
        let mgr = LockManager::new(4, Some(Duration::from_secs(5)));
        let key = Key::new("src", 1u64);
        let t10 = locker(10, Duration::from_secs(10));
        let t20 = locker(20, Duration::from_secs(10));

        assert!(mgr.lock(&t10, &key, false).unwrap().is_none());
        assert!(mgr.lock(&t20, &key, false).unwrap().is_none());
    }

    #[test]
    fn write_then_release_grants_waiting_reader() {
        let mgr = LockManager::new(4, Some(Duration::from_secs(5)));
        let key = Key::new("src", 1u64);
        let t10 = locker(10, Duration::from_secs(10));
        let t20 = locker(20, Duration::from_secs(10));

        assert!(mgr.lock(&t10, &key, true).unwrap().is_none());

        let blocked = std::thread::scope(|scope| {
            let mgr = &mgr;
            let key = &key;
            let t20 = t20.clone();
            scope.spawn(move || mgr.lock(&t20, key, false))
        });

        // Give the reader a moment to enqueue as a waiter.
        std::thread::sleep(Duration::from_millis(50));
        mgr.release_lock(&t10, &key);

        let result = blocked.join().unwrap().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn lock_timeout_reports_conflicting_locker() {
        let mgr = LockManager::new(1, Some(Duration::from_millis(50)));
        let key = Key::new("src", 1u64);
        let t10 = locker(10, Duration::from_secs(10));
        let t20 = locker(20, Duration::from_secs(10));

        assert!(mgr.lock(&t10, &key, true).unwrap().is_none());

        let conflict = mgr.lock(&t20, &key, true).unwrap();
        match conflict {
            Some(Conflict::Timeout(Some(holder))) => assert_eq!(holder, TransactionId::new(10)),
            other => panic!("expected Timeout(Some(T10)), got {other:?}"),
        }
    }

    #[test]
    fn lock_no_wait_reports_blocked_without_waiting() {
        let mgr = LockManager::new(1, Some(Duration::from_secs(5)));
        let key = Key::new("src", 1u64);
        let t10 = locker(10, Duration::from_secs(10));
        let t20 = locker(20, Duration::from_secs(10));

        assert!(mgr.lock_no_wait(&t10, &key, true).unwrap().is_none());

        match mgr.lock_no_wait(&t20, &key, true).unwrap() {
            Some(Conflict::Blocked(Some(holder))) => assert_eq!(holder, TransactionId::new(10)),
            other => panic!("expected Blocked(Some(T10)), got {other:?}"),
        }

        // The blocked locker is left queued as a waiter, not resolved.
        assert!(t20.waiting_for().is_some());
    }

    #[test]
    fn lock_no_wait_grants_uncontested_request() {
        let mgr = LockManager::new(1, Some(Duration::from_secs(5)));
        let key = Key::new("src", 1u64);
        let t10 = locker(10, Duration::from_secs(10));

        assert!(mgr.lock_no_wait(&t10, &key, false).unwrap().is_none());
    }

    #[test]
    fn wait_for_lock_from_a_different_thread_than_lock_no_wait_is_rejected() {
        let mgr = Arc::new(LockManager::new(1, Some(Duration::from_secs(5))));
        let key = Key::new("src", 1u64);
        let t10 = locker(10, Duration::from_secs(10));
        let t20 = locker(20, Duration::from_secs(10));

        assert!(mgr.lock_no_wait(&t10, &key, true).unwrap().is_none());
        assert!(matches!(
            mgr.lock_no_wait(&t20, &key, true).unwrap(),
            Some(Conflict::Blocked(_))
        ));

        // `wait_for_lock` is called from a different thread than the
        // one that issued `lock_no_wait` above.
        let mgr2 = mgr.clone();
        let t20_2 = t20.clone();
        let result = std::thread::spawn(move || mgr2.wait_for_lock(&t20_2)).join().unwrap();

        assert!(matches!(result, Err(AccessError::IllegalState(_))));
    }
}
