//! Cycle detection over the live waits-for relation, run each time a
//! locker blocks rather than against a separately maintained graph.

use std::collections::HashSet;
use std::sync::Arc;

use crate::locker::{Locker, TransactionId};

use super::shard::LockMap;

/// Walks the waits-for relation starting from a newly-blocked locker,
/// looking for a cycle back to itself. The relation is derived live
/// from each blocked locker's `waiting_for()` request and the `Lock`
/// it names, never from a separately maintained graph structure, so
/// there is nothing to keep in sync as grants come and go.
pub struct DeadlockDetector;

impl DeadlockDetector {
    /// Returns the victim to abort if `start` participates in a cycle,
    /// `None` if the wait is not (yet) part of one.
    ///
    /// `start` must already be recorded as waiting (its `waiting_for()`
    /// must be `Some`) before calling this.
    pub fn find_victim(map: &LockMap, start: &Arc<Locker>) -> Option<Arc<Locker>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        Self::walk(map, start, start.txn_id(), &mut visited, &mut path)
    }

    /// DFS over "locker blocked on key -> lockers that block it
    /// (granted holders and earlier queued waiters)". Returns the
    /// selected victim the first time the walk returns to `origin`.
    fn walk(
        map: &LockMap,
        current: &Arc<Locker>,
        origin: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<Arc<Locker>>,
    ) -> Option<Arc<Locker>> {
        if !visited.insert(current.txn_id()) {
            return None;
        }
        path.push(current.clone());

        let Some(request) = current.waiting_for() else {
            path.pop();
            return None;
        };

        let blockers: Vec<Arc<Locker>> = map.peek(&request.key, |lock| {
            let Some(lock) = lock else {
                return Vec::new();
            };
            lock.granted()
                .iter()
                .filter(|g| g.txn_id() != current.txn_id())
                .map(|g| g.locker.clone())
                .chain(
                    lock.waiters()
                        .take_while(|w| w.txn_id() != current.txn_id())
                        .map(|w| w.locker.clone()),
                )
                .collect()
        });

        for blocker in &blockers {
            if blocker.txn_id() == origin && path.len() > 1 {
                path.push(blocker.clone());
                let victim = Self::select_victim(path);
                path.pop();
                path.pop();
                return Some(victim);
            }
        }

        for blocker in blockers {
            if let Some(victim) = Self::walk(map, &blocker, origin, visited, path) {
                path.pop();
                return Some(victim);
            }
        }

        path.pop();
        None
    }

    /// Picks the youngest transaction in the cycle (maximum `age`),
    /// ties broken by lexicographically-greatest transaction id, so the
    /// choice is deterministic regardless of cycle discovery order.
    fn select_victim(cycle: &[Arc<Locker>]) -> Arc<Locker> {
        cycle
            .iter()
            .cloned()
            .reduce(|a, b| {
                if b.age() > a.age() {
                    b
                } else if b.age() == a.age() && b.txn_id().lexicographically_greater_than(&a.txn_id()) {
                    b
                } else {
                    a
                }
            })
            .expect("cycle is never empty")
    }
}
