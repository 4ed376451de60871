//! Identity of a lockable item: `(source, object_id)`.
//!
//! `source` namespaces object ids so unrelated services cannot collide.
//! `object_id` is caller-supplied and type-erased behind
//! [`ObjectIdentity`] so a single [`crate::lock::LockManager`] can serve
//! every [`crate::reporter::AccessReporter`] regardless of the concrete
//! id type each source uses.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Implemented automatically for any type usable as an object id.
///
/// `Eq + Hash` give `Key` structural equality; `Debug` backs the debug
/// descriptions recorded by [`crate::locker::Locker`].
pub trait ObjectIdentity: Any + fmt::Debug + Send + Sync {
    fn eq_dyn(&self, other: &dyn ObjectIdentity) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T> ObjectIdentity for T
where
    T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn eq_dyn(&self, other: &dyn ObjectIdentity) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|o| self == o)
    }

    fn hash_dyn(&self, state: &mut dyn Hasher) {
        self.hash(&mut ErasedHasher(state));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Forwards `Hash::hash`'s generic `H: Hasher` requirement onto a `dyn
/// Hasher` so `hash_dyn` can be called without knowing `T` at the call
/// site.
struct ErasedHasher<'a>(&'a mut dyn Hasher);

impl Hasher for ErasedHasher<'_> {
    fn finish(&self) -> u64 {
        self.0.finish()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes)
    }
}

/// Value identity for a lockable item.
///
/// Two keys are equal iff both `source` and `object_id` are equal.
#[derive(Clone)]
pub struct Key {
    source: Arc<str>,
    object_id: Arc<dyn ObjectIdentity>,
}

impl Key {
    pub fn new<T>(source: impl Into<Arc<str>>, object_id: T) -> Self
    where
        T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            object_id: Arc::new(object_id),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Debug rendering of just the object id, without the source
    /// namespace prefix `Display` includes.
    pub fn object_id_debug(&self) -> String {
        format!("{:?}", self.object_id)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.object_id.eq_dyn(&*other.object_id)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.object_id.hash_dyn(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key")
            .field(&self.source)
            .field(&self.object_id)
            .finish()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.source, self.object_id)
    }
}
