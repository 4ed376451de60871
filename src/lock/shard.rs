//! Hash-partitioned `Key -> Lock` map. Each shard is independently
//! mutexed so unrelated keys never contend with each other.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use crate::key::Key;

use super::state::Lock;

/// N independently-locked partitions of `Key -> Lock`.
///
/// A `Lock` exists in its shard's map while any locker holds or waits on
/// it; shards garbage-collect empty `Lock`s as soon as a mutating
/// operation leaves them empty.
pub struct LockMap {
    shards: Vec<Mutex<HashMap<Key, Lock>>>,
}

impl LockMap {
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards >= 1, "num_shards must be >= 1");
        Self {
            shards: (0..num_shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// The shard index a key hashes to. Exposed so the deadlock
    /// detector and release path can reason about lock-ordering when a
    /// walk needs more than one shard (acquire in ascending index).
    pub fn shard_index_for(&self, key: &Key) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Runs `f` against the `Lock` for `key`, creating it on first use
    /// and removing it again if `f` leaves it empty. This is the only
    /// way to mutate a `Lock`; it holds the owning shard's mutex for
    /// the duration of `f`, so `f` must never block or call back into
    /// this `LockMap`.
    pub fn with_lock_mut<R>(&self, key: &Key, f: impl FnOnce(&mut Lock) -> R) -> R {
        let index = self.shard_index_for(key);
        let mut shard = self.shards[index].lock();
        let entry = shard.entry(key.clone()).or_insert_with(Lock::new);
        let result = f(entry);
        if entry.is_empty() {
            shard.remove(key);
        }
        result
    }

    /// Read-only peek at the `Lock` for `key`, if one currently exists.
    /// Used by the deadlock detector to inspect granted holders without
    /// creating a `Lock` entry as a side effect.
    pub fn peek<R>(&self, key: &Key, f: impl FnOnce(Option<&Lock>) -> R) -> R {
        let index = self.shard_index_for(key);
        let shard = self.shards[index].lock();
        f(shard.get(key))
    }
}
