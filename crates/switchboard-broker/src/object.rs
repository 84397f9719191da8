//! Weak handles to publisher and subscriber objects.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Weak};

/// A shared, type-erased user object.
pub type ObjectRef = Arc<dyn Any + Send + Sync>;

/// Identity of a registered object.
///
/// Derived from the allocation address, so two keys only identify the same
/// object while that object is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    /// Key of the object behind `object`.
    #[must_use]
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        Self(Arc::as_ptr(object).cast::<()>().addr())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Non-owning reference to a publisher or subscriber.
#[derive(Clone)]
pub struct WeakObject {
    weak: Weak<dyn Any + Send + Sync>,
    key: ObjectKey,
    type_name: &'static str,
}

impl WeakObject {
    /// Downgrade a typed object.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(object: &Arc<T>) -> Self {
        let erased: ObjectRef = Arc::clone(object) as ObjectRef;
        Self::from_erased(&erased, type_name::<T>())
    }

    /// Downgrade an already erased object.
    #[must_use]
    pub fn from_erased(object: &ObjectRef, type_name: &'static str) -> Self {
        Self {
            weak: Arc::downgrade(object),
            key: ObjectKey::of(object),
            type_name,
        }
    }

    /// Get a strong reference if the object is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.weak.upgrade()
    }

    /// Check whether the object is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    /// Identity of the object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.key
    }

    /// Type name of the object.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObject")
            .field("key", &self.key)
            .field("type_name", &self.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// The object that raised an event.
#[derive(Clone, Default)]
pub struct Sender(Option<ObjectRef>);

impl Sender {
    /// Sender for the given object.
    #[must_use]
    pub fn new(object: ObjectRef) -> Self {
        Self(Some(object))
    }

    /// An anonymous sender.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// The raising object, if any.
    #[must_use]
    pub fn object(&self) -> Option<&ObjectRef> {
        self.0.as_ref()
    }

    /// The raising object as `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }

    /// Identity of the raising object.
    #[must_use]
    pub fn key(&self) -> Option<ObjectKey> {
        self.0.as_ref().map(ObjectKey::of)
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sender").field(&self.key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    #[test]
    fn test_weak_object_tracks_liveness() {
        let probe = Arc::new(Probe);
        let weak = WeakObject::new(&probe);

        assert!(weak.is_alive());
        assert_eq!(weak.key(), ObjectKey::of(&probe));
        assert!(weak.type_name().ends_with("Probe"));
        assert!(weak.upgrade().is_some());

        drop(probe);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_erased_key_matches_typed_key() {
        let probe = Arc::new(Probe);
        let erased: ObjectRef = Arc::clone(&probe) as ObjectRef;

        assert_eq!(ObjectKey::of(&erased), ObjectKey::of(&probe));
    }

    #[test]
    fn test_sender_downcast() {
        let probe = Arc::new(Probe);
        let sender = Sender::new(Arc::clone(&probe) as ObjectRef);

        assert!(sender.downcast_ref::<Probe>().is_some());
        assert!(sender.downcast_ref::<String>().is_none());
        assert_eq!(sender.key(), Some(ObjectKey::of(&probe)));
        assert!(Sender::none().object().is_none());
    }
}
