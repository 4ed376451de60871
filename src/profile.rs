//! Profiling sink consumed by [`crate::coordinator::AccessCoordinator`] on
//! transaction completion.

use parking_lot::Mutex;

use crate::lock::LockMode;

/// How a transaction's access attempt resolved, for the summary field of
/// an [`AccessedObjectsDetail`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    None,
    Deadlock,
    AccessNotGranted,
}

/// One accessed-object record published after a transaction completes.
///
/// `object_id` is formatted to `String` rather than kept as the original
/// typed value: the sink is shared across every `AccessReporter<T>`
/// regardless of `T`, so this is the type-erasure boundary.
#[derive(Debug, Clone)]
pub struct AccessedObjectsDetail {
    pub source: String,
    pub object_id: String,
    pub mode: LockMode,
    pub description: Option<String>,
    pub conflict: ConflictType,
}

/// External collaborator that receives per-transaction access summaries.
///
/// Implementations must not block significantly; `publish` is called
/// synchronously from the after-completion path, never while a shard
/// mutex is held.
pub trait ProfileSink: Send + Sync {
    fn publish(&self, txn_id: crate::locker::TransactionId, records: Vec<AccessedObjectsDetail>);
}

/// Discards everything. The default for callers with no profiling
/// collaborator.
pub struct NoopProfileSink;

impl ProfileSink for NoopProfileSink {
    fn publish(&self, _txn_id: crate::locker::TransactionId, _records: Vec<AccessedObjectsDetail>) {}
}

/// In-memory sink for tests: records every publish call in order.
pub struct RecordingProfileSink {
    published: Mutex<Vec<(crate::locker::TransactionId, Vec<AccessedObjectsDetail>)>>,
}

impl RecordingProfileSink {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn all(&self) -> Vec<(crate::locker::TransactionId, Vec<AccessedObjectsDetail>)> {
        self.published.lock().clone()
    }
}

impl Default for RecordingProfileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileSink for RecordingProfileSink {
    fn publish(&self, txn_id: crate::locker::TransactionId, records: Vec<AccessedObjectsDetail>) {
        self.published.lock().push((txn_id, records));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_publish_order() {
        let sink = RecordingProfileSink::new();
        sink.publish(crate::locker::TransactionId::new(1), vec![]);
        sink.publish(crate::locker::TransactionId::new(2), vec![]);

        let all = sink.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, crate::locker::TransactionId::new(1));
        assert_eq!(all[1].0, crate::locker::TransactionId::new(2));
    }
}
