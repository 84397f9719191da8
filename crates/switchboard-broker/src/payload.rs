//! Type-erased event payloads.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Declared or actual type of an event payload.
#[derive(Clone, Copy)]
pub struct PayloadType {
    id: Option<TypeId>,
    name: &'static str,
}

impl PayloadType {
    /// The payload type of `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            id: Some(TypeId::of::<T>()),
            name: type_name::<T>(),
        }
    }

    /// The catch-all type, accepting every payload.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            id: None,
            name: "any",
        }
    }

    /// Whether this is the catch-all type.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.id.is_none()
    }

    /// Whether a handler declaring `self` can receive payloads of type `actual`.
    #[must_use]
    pub fn accepts(&self, actual: &PayloadType) -> bool {
        match self.id {
            None => true,
            Some(id) => actual.id == Some(id),
        }
    }

    /// Type name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

impl Hash for PayloadType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadType({})", self.name)
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// An event payload, shared between every subscription it is relayed to.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    payload_type: PayloadType,
}

impl Payload {
    /// Wrap a value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value.
    #[must_use]
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            payload_type: PayloadType::of::<T>(),
        }
    }

    /// Actual type of the wrapped value.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// The wrapped value as `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether the wrapped value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.payload_type.name())
            .finish_non_exhaustive()
    }
}

/// Payload wrapper carrying a single value.
///
/// Handlers built with [`HandlerMethod::value`](crate::HandlerMethod::value)
/// subscribe to `DataEvent<V>` and receive the unwrapped `V`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataEvent<V> {
    /// The carried value.
    pub value: V,
}

impl<V> DataEvent<V> {
    /// Wrap a value.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_accepts_everything() {
        let any = PayloadType::any();
        assert!(any.is_any());
        assert!(any.accepts(&PayloadType::of::<u32>()));
        assert!(any.accepts(&PayloadType::any()));
    }

    #[test]
    fn test_concrete_accepts_only_itself() {
        let int = PayloadType::of::<u32>();
        assert!(int.accepts(&PayloadType::of::<u32>()));
        assert!(!int.accepts(&PayloadType::of::<u64>()));
        assert!(!int.accepts(&PayloadType::any()));
    }

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::new(DataEvent::new("hello".to_string()));

        assert!(payload.is::<DataEvent<String>>());
        assert_eq!(
            payload.downcast_ref::<DataEvent<String>>().unwrap().value,
            "hello"
        );
        assert!(payload.downcast_ref::<String>().is_none());
        assert_eq!(
            payload.payload_type(),
            PayloadType::of::<DataEvent<String>>()
        );
    }
}
