//! End-to-end scenarios against the public `AccessCoordinator` /
//! `AccessReporter` surface, using real OS threads for every blocked
//! transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use access_coordinator::{
    AccessCoordinator, AccessCoordinatorConfig, AccessError, CompletionListener, LockMode,
    NoopProfileSink, Transaction, TransactionId,
};

struct TestTxn {
    id: u64,
    creation_time_ms: u64,
    timeout: Duration,
    aborted: AtomicBool,
    listener: Mutex<Option<Arc<dyn CompletionListener>>>,
}

impl TestTxn {
    /// `creation_time_ms` is stamped from the same wall-clock epoch the
    /// lock manager's internal `now_ms()` uses, so the deadline math
    /// (`min(now + lock_timeout, creation_time + txn_timeout)`) lines
    /// up with real elapsed time in these tests.
    fn new(id: u64, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            creation_time_ms: wall_clock_now_ms(),
            timeout,
            aborted: AtomicBool::new(false),
            listener: Mutex::new(None),
        })
    }

    /// Simulates the owning transaction manager firing the registered
    /// completion listener once every participant has observed this
    /// transaction's final commit or abort outcome.
    fn complete(&self) {
        if let Some(listener) = self.listener.lock().unwrap().clone() {
            listener.on_transaction_complete(TransactionId::new(self.id));
        }
    }
}

fn wall_clock_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

impl Transaction for TestTxn {
    fn id(&self) -> TransactionId {
        TransactionId::new(self.id)
    }
    fn creation_time_ms(&self) -> u64 {
        self.creation_time_ms
    }
    fn timeout(&self) -> Duration {
        self.timeout
    }
    fn abort(&self, _error: &AccessError) {
        self.aborted.store(true, Ordering::SeqCst);
    }
    fn register_completion_listener(&self, listener: Arc<dyn CompletionListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }
}

fn coordinator() -> AccessCoordinator {
    AccessCoordinator::new(AccessCoordinatorConfig::default(), Arc::new(NoopProfileSink))
}

#[test]
fn scenario_1_read_sharing() {
    let coord = coordinator();
    let reporter = coord.register_access_source::<u64>("docs");

    let t10 = TestTxn::new(10, Duration::from_secs(10));
    let t20 = TestTxn::new(20, Duration::from_secs(10));
    coord.notify_new_transaction(t10.clone(), 0, 1).unwrap();
    coord.notify_new_transaction(t20.clone(), 0, 1).unwrap();

    reporter
        .report_object_access(TransactionId::new(10), 1, LockMode::Read, None)
        .unwrap();
    reporter
        .report_object_access(TransactionId::new(20), 1, LockMode::Read, None)
        .unwrap();

    t10.complete();
    t20.complete();
    assert!(!t10.aborted.load(Ordering::SeqCst));
    assert!(!t20.aborted.load(Ordering::SeqCst));
}

#[test]
fn scenario_2_write_blocks_then_grants_on_release() {
    let coord = Arc::new(coordinator());
    let reporter = coord.register_access_source::<u64>("docs");

    let t10 = TestTxn::new(10, Duration::from_secs(10));
    let t20 = TestTxn::new(20, Duration::from_secs(10));
    coord.notify_new_transaction(t10.clone(), 0, 1).unwrap();
    coord.notify_new_transaction(t20.clone(), 0, 1).unwrap();

    reporter
        .report_object_access(TransactionId::new(10), 1, LockMode::Write, None)
        .unwrap();

    let blocked = std::thread::spawn({
        let reporter = reporter.clone();
        move || reporter.report_object_access(TransactionId::new(20), 1, LockMode::Read, None)
    });

    std::thread::sleep(Duration::from_millis(50));
    t10.complete();

    blocked.join().unwrap().unwrap();
    assert!(!t10.aborted.load(Ordering::SeqCst));
    assert!(!t20.aborted.load(Ordering::SeqCst));
}

#[test]
fn scenario_3_classic_deadlock_picks_older_age_as_survivor() {
    let coord = Arc::new(coordinator());
    let reporter = coord.register_access_source::<u64>("docs");

    // K1 = ("docs", 1), K2 = ("docs", 2)
    let t10 = TestTxn::new(10, Duration::from_secs(10));
    let t20 = TestTxn::new(20, Duration::from_secs(10));
    coord.notify_new_transaction(t10.clone(), 100, 1).unwrap();
    coord.notify_new_transaction(t20.clone(), 200, 1).unwrap();

    reporter
        .report_object_access(TransactionId::new(10), 1, LockMode::Write, None)
        .unwrap();
    reporter
        .report_object_access(TransactionId::new(20), 2, LockMode::Write, None)
        .unwrap();

    let t10_blocked = std::thread::spawn({
        let reporter = reporter.clone();
        move || reporter.report_object_access(TransactionId::new(10), 2, LockMode::Write, None)
    });

    std::thread::sleep(Duration::from_millis(50));

    // T20's second request closes the cycle and triggers detection.
    let t20_result = reporter.report_object_access(TransactionId::new(20), 1, LockMode::Write, None);
    assert!(matches!(t20_result, Err(AccessError::TransactionConflict { .. })));
    assert!(t20.aborted.load(Ordering::SeqCst));

    t20.complete();
    t10_blocked.join().unwrap().unwrap();
    assert!(!t10.aborted.load(Ordering::SeqCst));
}

#[test]
fn scenario_4_tie_break_is_lexicographic_not_numeric() {
    let coord = Arc::new(coordinator());
    let reporter = coord.register_access_source::<u64>("docs");

    // Same age for both; lexicographic comparison of "9" vs "10" makes
    // T9 the greater id ("9" > "10"), despite 9 < 10 numerically.
    let t9 = TestTxn::new(9, Duration::from_secs(10));
    let t10 = TestTxn::new(10, Duration::from_secs(10));
    coord.notify_new_transaction(t9.clone(), 100, 1).unwrap();
    coord.notify_new_transaction(t10.clone(), 100, 1).unwrap();

    reporter
        .report_object_access(TransactionId::new(9), 1, LockMode::Write, None)
        .unwrap();
    reporter
        .report_object_access(TransactionId::new(10), 2, LockMode::Write, None)
        .unwrap();

    let t9_blocked = std::thread::spawn({
        let reporter = reporter.clone();
        move || reporter.report_object_access(TransactionId::new(9), 2, LockMode::Write, None)
    });

    std::thread::sleep(Duration::from_millis(50));

    let t10_result = reporter.report_object_access(TransactionId::new(10), 1, LockMode::Write, None);
    assert!(matches!(t10_result, Err(AccessError::TransactionConflict { .. })));
    assert!(t10.aborted.load(Ordering::SeqCst));

    t10.complete();
    t9_blocked.join().unwrap().unwrap();
    assert!(!t9.aborted.load(Ordering::SeqCst));
}

#[test]
fn scenario_5_upgrade_priority() {
    let coord = Arc::new(coordinator());
    let reporter = coord.register_access_source::<u64>("docs");

    let t10 = TestTxn::new(10, Duration::from_secs(10));
    let t20 = TestTxn::new(20, Duration::from_secs(10));
    let t30 = TestTxn::new(30, Duration::from_secs(10));
    coord.notify_new_transaction(t10.clone(), 0, 1).unwrap();
    coord.notify_new_transaction(t20.clone(), 0, 1).unwrap();
    coord.notify_new_transaction(t30.clone(), 0, 1).unwrap();

    reporter
        .report_object_access(TransactionId::new(10), 1, LockMode::Read, None)
        .unwrap();
    reporter
        .report_object_access(TransactionId::new(20), 1, LockMode::Read, None)
        .unwrap();

    let t30_blocked = std::thread::spawn({
        let reporter = reporter.clone();
        move || reporter.report_object_access(TransactionId::new(30), 1, LockMode::Write, None)
    });
    std::thread::sleep(Duration::from_millis(30));

    let t10_upgrade = std::thread::spawn({
        let reporter = reporter.clone();
        move || reporter.report_object_access(TransactionId::new(10), 1, LockMode::Write, None)
    });
    std::thread::sleep(Duration::from_millis(30));

    t20.complete();

    t10_upgrade.join().unwrap().unwrap();
    assert!(!t30_blocked.is_finished());

    t10.complete();
    t30_blocked.join().unwrap().unwrap();
}

#[test]
fn scenario_6_lock_timeout_reports_conflicting_transaction() {
    let config = AccessCoordinatorConfig {
        lock_timeout: Some(Duration::from_millis(50)),
        num_key_maps: 4,
    };
    let coord = coordinator_with(config);
    let reporter = coord.register_access_source::<u64>("docs");

    let t10 = TestTxn::new(10, Duration::from_secs(10));
    let t20 = TestTxn::new(20, Duration::from_secs(10));
    coord.notify_new_transaction(t10.clone(), 0, 1).unwrap();
    coord.notify_new_transaction(t20.clone(), 0, 1).unwrap();

    reporter
        .report_object_access(TransactionId::new(10), 1, LockMode::Write, None)
        .unwrap();

    let result = reporter.report_object_access(TransactionId::new(20), 1, LockMode::Write, None);
    assert!(matches!(result, Err(AccessError::TransactionTimeout { .. })));
    assert!(t20.aborted.load(Ordering::SeqCst));
    assert!(!t10.aborted.load(Ordering::SeqCst));
}

fn coordinator_with(config: AccessCoordinatorConfig) -> AccessCoordinator {
    AccessCoordinator::new(config, Arc::new(NoopProfileSink))
}
