//! Per-transaction lock state ([`Locker`]) and the `Transaction`
//! collaborator contract it wraps.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::key::Key;
use crate::lock::{Conflict, LockRequest};

/// Opaque transaction identifier, used as the key of the coordinator's
/// `txn -> Locker` map and for deadlock victim tie-breaking.
///
/// Ordering and [`fmt::Display`] are lexicographic over the decimal
/// rendering of the wrapped value, matching spec's "ties broken by
/// transaction id lexicographic order" literally rather than by numeric
/// magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const fn new(id: u64) -> Self {
        TransactionId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// The key used to order transaction ids lexicographically for
    /// deadlock victim tie-breaking (see `DeadlockDetector`).
    fn lexicographic_key(&self) -> String {
        self.0.to_string()
    }

    /// True if `self` sorts lexicographically greater than `other`.
    pub fn lexicographically_greater_than(&self, other: &TransactionId) -> bool {
        self.lexicographic_key() > other.lexicographic_key()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// The external transaction coordinator's contract, as consumed by this
/// core. Creation, commit, and abort of transactions are the
/// coordinator's responsibility; this crate only calls back into it to
/// abort on conflict and to learn timing/timeout facts.
pub trait Transaction: Send + Sync {
    /// Stable identifier, used as the `txn -> Locker` map key.
    fn id(&self) -> TransactionId;

    /// Wall-clock creation time of the transaction, in milliseconds
    /// since an arbitrary monotonic epoch shared with `age`.
    fn creation_time_ms(&self) -> u64;

    /// The transaction's configured timeout.
    fn timeout(&self) -> Duration;

    /// Aborts the transaction with the given error. Called by
    /// [`crate::reporter::AccessReporter`] on any lock conflict; never
    /// called while a shard mutex is held.
    fn abort(&self, error: &crate::error::AccessError);

    /// Registers `listener` to be fired exactly once, after every
    /// participant has observed this transaction's final commit or
    /// abort outcome. The transaction implementation owns this
    /// lifecycle; it is expected to store `listener` and invoke it from
    /// its own completion path. `AccessCoordinator::notify_new_transaction`
    /// registers the listener that releases this transaction's locks,
    /// so callers must not release locks themselves.
    fn register_completion_listener(&self, listener: Arc<dyn CompletionListener>);
}

/// Fired once by a [`Transaction`] after every participant has observed
/// its commit or abort outcome. `AccessCoordinator` registers one of
/// these per transaction to release its locks and publish its access
/// summary; see [`Transaction::register_completion_listener`].
pub trait CompletionListener: Send + Sync {
    fn on_transaction_complete(&self, txn_id: TransactionId);
}

/// Per-transaction lock-coordination state.
///
/// A `Locker` is created once per transaction by
/// [`crate::coordinator::AccessCoordinator::notify_new_transaction`] and
/// is exclusively owned by that transaction's entry in the coordinator's
/// registry. Its `granted`/`waiters` presence is mutated by
/// [`crate::lock::LockManager`] only while holding the mutex of the
/// shard owning the relevant key.
pub struct Locker {
    txn: Arc<dyn Transaction>,
    /// The transaction's originally requested start time; smaller means
    /// older. Used for deadlock victim selection.
    age: u64,
    /// Every lock request ever made by this locker in this transaction,
    /// append-only, used to drive bulk release on completion.
    requests: Mutex<Vec<LockRequest>>,
    /// Debug label per key, first-writer-wins.
    key_descriptions: Mutex<HashMap<Key, String>>,

    wait: Mutex<WaitState>,
    wait_condvar: Condvar,

    /// Set once this locker has observed a terminal conflict; all
    /// subsequent lock/wait calls fail with `IllegalState` per spec
    /// once this becomes `Deadlock`. Tracked alongside `wait.conflict`
    /// for lock-free fast-path reads from the locker's own thread.
    has_conflicted: AtomicBool,
}

struct WaitState {
    /// The request this locker is currently blocked on, the thread that
    /// issued it (cross-thread `wait_for_lock` is rejected, per the
    /// Open Question in spec's design notes), and the wait deadline
    /// fixed at the moment the wait began.
    waiting_for: Option<(LockRequest, ThreadId, u64)>,
    conflict: Option<Conflict>,
}

impl Locker {
    pub fn new(txn: Arc<dyn Transaction>, age: u64) -> Arc<Self> {
        Arc::new(Self {
            txn,
            age,
            requests: Mutex::new(Vec::new()),
            key_descriptions: Mutex::new(HashMap::new()),
            wait: Mutex::new(WaitState {
                waiting_for: None,
                conflict: None,
            }),
            wait_condvar: Condvar::new(),
            has_conflicted: AtomicBool::new(false),
        })
    }

    pub fn txn_id(&self) -> TransactionId {
        self.txn.id()
    }

    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        &self.txn
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    /// Deadline for the current lock wait:
    /// `min(now + lock_timeout, txn.creation_time + txn.timeout)`.
    ///
    /// `configured_lock_timeout` is the coordinator's `lock.timeout`
    /// override, if any; `None` falls back to this transaction's own
    /// default of `0.1 * txn.timeout()`, floored at 1ms, since no single
    /// flat value fits every transaction's timeout.
    pub fn wait_deadline_ms(&self, now_ms: u64, configured_lock_timeout: Option<Duration>) -> u64 {
        let lock_timeout = configured_lock_timeout.unwrap_or_else(|| default_lock_timeout(self.txn.timeout()));
        let by_lock_timeout = now_ms.saturating_add(lock_timeout.as_millis() as u64);
        let by_txn_timeout = self
            .txn
            .creation_time_ms()
            .saturating_add(self.txn.timeout().as_millis() as u64);
        by_lock_timeout.min(by_txn_timeout)
    }

    pub fn record_request(&self, request: LockRequest) {
        self.requests.lock().push(request);
    }

    /// All requests ever made by this locker, oldest first.
    pub fn requests_snapshot(&self) -> Vec<LockRequest> {
        self.requests.lock().clone()
    }

    pub fn describe_key(&self, key: &Key, description: String) {
        self.key_descriptions
            .lock()
            .entry(key.clone())
            .or_insert(description);
    }

    pub fn description_of(&self, key: &Key) -> Option<String> {
        self.key_descriptions.lock().get(key).cloned()
    }

    /// Current terminal conflict, if any.
    pub fn conflict(&self) -> Option<Conflict> {
        self.wait.lock().conflict
    }

    /// Lock-free check for the sticky `Deadlock` state: once a locker is
    /// declared a deadlock victim, every later `lock`/`wait_for_lock`
    /// call must fail fast with `IllegalState` without ever touching a
    /// shard mutex.
    pub fn has_deadlocked(&self) -> bool {
        self.has_conflicted.load(Ordering::Acquire)
    }

    /// Marks this locker as blocked on `request` with a fixed wait
    /// deadline, called immediately after the request was queued as a
    /// waiter.
    pub fn begin_wait(&self, request: LockRequest, deadline_ms: u64) {
        let mut wait = self.wait.lock();
        wait.waiting_for = Some((request, std::thread::current().id(), deadline_ms));
        wait.conflict = None;
    }

    pub fn waiting_for(&self) -> Option<LockRequest> {
        self.wait
            .lock()
            .waiting_for
            .as_ref()
            .map(|(r, _, _)| r.clone())
    }

    /// Signals a terminal conflict on the locker currently blocked, and
    /// wakes its waiter. Called by the deadlock detector or by
    /// `LockManager` while holding the relevant shard mutex.
    pub fn signal_conflict(&self, conflict: Conflict) {
        {
            let mut wait = self.wait.lock();
            wait.conflict = Some(conflict);
            wait.waiting_for = None;
        }
        if matches!(conflict, Conflict::Deadlock) {
            self.has_conflicted.store(true, Ordering::Release);
        }
        self.wait_condvar.notify_all();
    }

    /// Interrupts this locker's current wait, if any. Rust has no
    /// built-in equivalent of Java's `Thread.interrupt()`; callers that
    /// want to cancel a blocked lock wait (e.g. on shutdown) call this
    /// explicitly, and the blocked [`Locker::wait_until`] surfaces
    /// `Conflict::Interrupted`.
    pub fn interrupt(&self) {
        let mut wait = self.wait.lock();
        if wait.waiting_for.is_some() {
            wait.conflict = Some(Conflict::Interrupted);
            wait.waiting_for = None;
        }
        drop(wait);
        self.wait_condvar.notify_all();
    }

    /// Clears the wait state on grant and wakes the waiter.
    pub fn signal_granted(&self) {
        {
            let mut wait = self.wait.lock();
            wait.waiting_for = None;
            wait.conflict = None;
        }
        self.wait_condvar.notify_all();
    }

    /// Blocks the calling thread until granted, timed out, interrupted,
    /// or declared a deadlock victim, honoring the deadline recorded by
    /// [`Locker::begin_wait`]. Must be called from the same thread that
    /// set `waiting_for`.
    ///
    /// Returns [`WaitOutcome::WrongThread`] if called from a different
    /// thread than the one that issued the original request, per the
    /// single-threaded-per-txn resolution of the Open Question.
    pub fn wait_until(&self, now_ms_fn: impl Fn() -> u64) -> WaitOutcome {
        let current_thread = std::thread::current().id();
        let mut wait = self.wait.lock();

        let deadline_ms = match &wait.waiting_for {
            None => return WaitOutcome::NothingToWaitFor,
            Some((_, owner_thread, _)) if *owner_thread != current_thread => {
                return WaitOutcome::WrongThread;
            }
            Some((_, _, deadline_ms)) => *deadline_ms,
        };

        loop {
            if wait.waiting_for.is_none() {
                return match wait.conflict {
                    Some(conflict) => WaitOutcome::Conflict(conflict),
                    None => WaitOutcome::Granted,
                };
            }

            let now = now_ms_fn();
            if now >= deadline_ms {
                return WaitOutcome::DeadlineExpired;
            }
            let remaining = Duration::from_millis(deadline_ms - now);
            self.wait_condvar.wait_for(&mut wait, remaining);
        }
    }
}

pub enum WaitOutcome {
    Granted,
    Conflict(Conflict),
    DeadlineExpired,
    NothingToWaitFor,
    WrongThread,
}

/// `lock.timeout`'s default: `0.1 * transaction-timeout`, floored at 1ms.
fn default_lock_timeout(txn_timeout: Duration) -> Duration {
    let tenth_ms = (txn_timeout.as_millis() as u64) / 10;
    Duration::from_millis(tenth_ms.max(1))
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("txn_id", &self.txn_id())
            .field("age", &self.age)
            .finish()
    }
}
