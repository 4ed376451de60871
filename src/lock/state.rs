//! Per-key lock state machine: granted set + FIFO waiter queue, and the
//! grant rule that re-evaluates the waiter queue after any state change.

use std::collections::VecDeque;

use crate::locker::TransactionId;

use super::request::{LockMode, LockRequest};

/// Per-key lock state.
///
/// Invariants (checked only by tests — the implementation is written to
/// never violate them):
/// - at most one `Write` in `granted`; if any `Write` is granted,
///   `granted.len() == 1`,
/// - a locker appears in `granted` at most once per key, except
///   transiently during an upgrade (held `Read` + queued upgrade
///   request),
/// - `waiters` holds no request whose locker already owns the key at
///   the requested-or-stronger mode.
#[derive(Default)]
pub struct Lock {
    granted: Vec<LockRequest>,
    waiters: VecDeque<LockRequest>,
}

impl Lock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.waiters.is_empty()
    }

    pub fn granted_mode_for(&self, txn_id: TransactionId) -> Option<LockMode> {
        self.granted
            .iter()
            .find(|g| g.txn_id() == txn_id)
            .map(|g| g.mode())
    }

    pub fn granted(&self) -> &[LockRequest] {
        &self.granted
    }

    pub fn waiters(&self) -> impl Iterator<Item = &LockRequest> {
        self.waiters.iter()
    }

    /// Inserts a new waiter. Upgrade requests are placed before all
    /// existing non-upgrade waiters but after any existing upgrade
    /// waiters (upgrades are FIFO among themselves).
    pub fn insert_waiter(&mut self, request: LockRequest) {
        if request.upgrade {
            let position = self
                .waiters
                .iter()
                .position(|w| !w.upgrade)
                .unwrap_or(self.waiters.len());
            self.waiters.insert(position, request);
        } else {
            self.waiters.push_back(request);
        }
    }

    pub fn remove_waiter(&mut self, txn_id: TransactionId) {
        self.waiters.retain(|w| w.txn_id() != txn_id);
    }

    /// Removes any grant held by `txn_id`. Returns `true` if a grant was
    /// removed.
    pub fn remove_granted(&mut self, txn_id: TransactionId) -> bool {
        let before = self.granted.len();
        self.granted.retain(|g| g.txn_id() != txn_id);
        self.granted.len() != before
    }

    /// True iff the immediate-grant check for `request` succeeds against
    /// the *current* granted set (ignoring the waiter queue). Used only
    /// to decide whether a brand-new request may skip the queue
    /// entirely; once anything is queued, FIFO ordering takes over via
    /// [`Lock::run_grant_rule`].
    pub fn can_grant_immediately(&self, request: &LockRequest) -> bool {
        if !self.waiters.is_empty() {
            return false;
        }
        self.grantable(request)
    }

    fn grantable(&self, request: &LockRequest) -> bool {
        if request.for_write {
            self.granted.is_empty()
                || (self.granted.len() == 1 && self.granted[0].txn_id() == request.txn_id())
        } else {
            !self.granted.iter().any(|g| g.for_write)
        }
    }

    /// Grants `request` immediately, reconciling a self-upgrade (the
    /// held `Read` is replaced by the new `Write`).
    pub fn grant(&mut self, request: LockRequest) {
        if request.for_write {
            self.granted.retain(|g| g.txn_id() != request.txn_id());
        }
        self.granted.push(request);
    }

    /// Re-evaluates the grant rule from the head of the waiter queue,
    /// granting every waiter that can be granted and stopping at the
    /// first one that cannot (so FIFO order and writer-starvation
    /// avoidance both hold). Returns the requests newly granted, in
    /// grant order, so the caller can signal each one's locker.
    pub fn run_grant_rule(&mut self) -> Vec<LockRequest> {
        let mut granted_now = Vec::new();
        loop {
            let Some(head) = self.waiters.front() else {
                break;
            };
            if !self.grantable(head) {
                break;
            }
            let request = self.waiters.pop_front().expect("front just checked");
            self.grant(request.clone());
            granted_now.push(request);
        }
        granted_now
    }

    /// The foreign locker blocking `request`, for diagnostic reporting:
    /// a granted holder it's incompatible with, or else the locker at
    /// the front of the waiter queue if one is already queued ahead of
    /// it.
    pub fn blocking_locker(&self, request: &LockRequest) -> Option<TransactionId> {
        if let Some(holder) = self
            .granted
            .iter()
            .find(|g| g.txn_id() != request.txn_id() && !g.mode().is_compatible_with(request.mode()))
        {
            return Some(holder.txn_id());
        }
        self.waiters
            .front()
            .filter(|w| w.txn_id() != request.txn_id())
            .map(|w| w.txn_id())
    }
}
