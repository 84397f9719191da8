//! Discovery of an object's publications and subscriptions.
//!
//! The registrar never looks inside objects itself. It asks an
//! [`Inspector`] for a [`Scan`] of descriptors and registers what it gets
//! back. [`TypeInspector`] answers for types implementing [`Inspectable`].

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::HandlerMethod;
use crate::matcher::MatcherRef;
use crate::object::ObjectRef;
use crate::registrar::Registrar;
use crate::source::SourceHandle;
use crate::strategy::StrategyKind;

/// Describes one publication an object wants.
#[derive(Debug, Clone)]
pub struct PublicationDescriptor {
    /// Topic URI.
    pub topic: String,
    /// Event source to bind.
    pub source: SourceHandle,
    /// Strategy kind subscriptions must use, if any.
    pub restriction: Option<StrategyKind>,
    /// Publication-scoped matchers.
    pub matchers: Vec<MatcherRef>,
}

impl PublicationDescriptor {
    /// Publish `source` on `topic`.
    pub fn new(topic: impl Into<String>, source: impl Into<SourceHandle>) -> Self {
        Self {
            topic: topic.into(),
            source: source.into(),
            restriction: None,
            matchers: Vec::new(),
        }
    }

    /// Require subscriptions to use `kind`.
    #[must_use]
    pub fn restricted_to(mut self, kind: StrategyKind) -> Self {
        self.restriction = Some(kind);
        self
    }

    /// Add a matcher.
    #[must_use]
    pub fn matcher(mut self, matcher: impl Into<MatcherRef>) -> Self {
        self.matchers.push(matcher.into());
        self
    }
}

/// Describes one subscription an object wants.
#[derive(Debug, Clone)]
pub struct SubscriptionDescriptor {
    /// Topic URI.
    pub topic: String,
    /// Handler to bind.
    pub handler: HandlerMethod,
    /// Strategy kind, or the registrar's default when `None`.
    pub strategy: Option<StrategyKind>,
    /// Subscription-scoped matchers.
    pub matchers: Vec<MatcherRef>,
}

impl SubscriptionDescriptor {
    /// Subscribe `handler` to `topic`.
    pub fn new(topic: impl Into<String>, handler: HandlerMethod) -> Self {
        Self {
            topic: topic.into(),
            handler,
            strategy: None,
            matchers: Vec::new(),
        }
    }

    /// Run the handler with the `kind` strategy.
    #[must_use]
    pub fn strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy = Some(kind);
        self
    }

    /// Add a matcher.
    #[must_use]
    pub fn matcher(mut self, matcher: impl Into<MatcherRef>) -> Self {
        self.matchers.push(matcher.into());
        self
    }
}

/// Hooks an object runs around its descriptor-driven registration.
pub trait SelfRegistration: Send + Sync {
    /// Runs after the object's descriptors were registered.
    ///
    /// # Errors
    ///
    /// A failure rolls back the whole registration.
    fn on_register(&self, registrar: &Registrar) -> anyhow::Result<()>;

    /// Runs before the object's descriptors are unregistered.
    ///
    /// # Errors
    ///
    /// A failure aborts the unregistration.
    fn on_unregister(&self, registrar: &Registrar) -> anyhow::Result<()>;
}

/// Everything an inspector found on one object.
#[derive(Default)]
pub struct Scan {
    /// Publications to add.
    pub publications: Vec<PublicationDescriptor>,
    /// Subscriptions to add.
    pub subscriptions: Vec<SubscriptionDescriptor>,
    /// Optional self-registration hook.
    pub self_registration: Option<Box<dyn SelfRegistration>>,
}

impl Scan {
    /// Add a publication descriptor.
    pub fn publish(&mut self, descriptor: PublicationDescriptor) -> &mut Self {
        self.publications.push(descriptor);
        self
    }

    /// Add a subscription descriptor.
    pub fn subscribe(&mut self, descriptor: SubscriptionDescriptor) -> &mut Self {
        self.subscriptions.push(descriptor);
        self
    }

    /// Whether nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publications.is_empty()
            && self.subscriptions.is_empty()
            && self.self_registration.is_none()
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("publications", &self.publications)
            .field("subscriptions", &self.subscriptions)
            .field("self_registration", &self.self_registration.is_some())
            .finish()
    }
}

/// Produces descriptors for an object.
pub trait Inspector: Send + Sync {
    /// Scan `object`. Objects the inspector knows nothing about yield an empty scan.
    fn scan(&self, object: &ObjectRef) -> Scan;
}

/// A type that describes its own publications and subscriptions.
pub trait Inspectable: Any + Send + Sync + Sized {
    /// Add this object's descriptors to `scan`.
    fn inspect(this: &Arc<Self>, scan: &mut Scan);

    /// Runs after the object's descriptors were registered.
    ///
    /// # Errors
    ///
    /// A failure rolls back the whole registration.
    fn on_register(this: &Arc<Self>, registrar: &Registrar) -> anyhow::Result<()> {
        let _ = (this, registrar);
        Ok(())
    }

    /// Runs before the object's descriptors are unregistered.
    ///
    /// # Errors
    ///
    /// A failure aborts the unregistration.
    fn on_unregister(this: &Arc<Self>, registrar: &Registrar) -> anyhow::Result<()> {
        let _ = (this, registrar);
        Ok(())
    }
}

struct InspectableHooks<T>(Arc<T>);

impl<T: Inspectable> SelfRegistration for InspectableHooks<T> {
    fn on_register(&self, registrar: &Registrar) -> anyhow::Result<()> {
        T::on_register(&self.0, registrar)
    }

    fn on_unregister(&self, registrar: &Registrar) -> anyhow::Result<()> {
        T::on_unregister(&self.0, registrar)
    }
}

type ScanFn = Arc<dyn Fn(ObjectRef, &mut Scan) + Send + Sync>;

/// Inspector dispatching on the object's concrete type.
#[derive(Clone, Default)]
pub struct TypeInspector {
    scanners: HashMap<TypeId, (&'static str, ScanFn)>,
}

impl TypeInspector {
    /// Create an inspector that knows no types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Teach the inspector about `T`.
    pub fn register<T: Inspectable>(&mut self) {
        let scanner: ScanFn = Arc::new(|object: ObjectRef, scan: &mut Scan| {
            if let Ok(object) = Arc::downcast::<T>(object) {
                T::inspect(&object, scan);
                scan.self_registration = Some(Box::new(InspectableHooks(object)));
            }
        });
        self.scanners
            .insert(TypeId::of::<T>(), (type_name::<T>(), scanner));
    }

    /// Teach the inspector about `T`, builder style.
    #[must_use]
    pub fn with<T: Inspectable>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Whether `T` is known.
    #[must_use]
    pub fn knows<T: Any>(&self) -> bool {
        self.scanners.contains_key(&TypeId::of::<T>())
    }
}

impl Inspector for TypeInspector {
    fn scan(&self, object: &ObjectRef) -> Scan {
        let mut scan = Scan::default();
        if let Some((_, scanner)) = self.scanners.get(&(**object).type_id()) {
            scanner(Arc::clone(object), &mut scan);
        }
        scan
    }
}

impl fmt::Debug for TypeInspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.scanners.values().map(|(name, _)| *name).collect();
        types.sort_unstable();
        f.debug_struct("TypeInspector").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EventSource;

    struct Widget {
        changed: EventSource<u32>,
    }

    impl Inspectable for Widget {
        fn inspect(this: &Arc<Self>, scan: &mut Scan) {
            scan.publish(
                PublicationDescriptor::new("ui.widget", &this.changed)
                    .restricted_to(StrategyKind::SYNCHRONOUS)
                    .matcher("always"),
            )
            .subscribe(
                SubscriptionDescriptor::new(
                    "ui.other",
                    HandlerMethod::payload("on_other", |_: &Widget, _: &u32| Ok(())),
                )
                .strategy(StrategyKind::BACKGROUND),
            );
        }
    }

    struct Unknown;

    #[test]
    fn test_scan_known_type() {
        let inspector = TypeInspector::new().with::<Widget>();
        assert!(inspector.knows::<Widget>());

        let widget: ObjectRef = Arc::new(Widget {
            changed: EventSource::new("changed"),
        });
        let scan = inspector.scan(&widget);

        assert_eq!(scan.publications.len(), 1);
        assert_eq!(scan.publications[0].topic, "ui.widget");
        assert_eq!(scan.publications[0].source.name(), "changed");
        assert_eq!(
            scan.publications[0].restriction,
            Some(StrategyKind::SYNCHRONOUS)
        );
        assert_eq!(scan.subscriptions.len(), 1);
        assert_eq!(scan.subscriptions[0].handler.name(), "on_other");
        assert_eq!(
            scan.subscriptions[0].strategy,
            Some(StrategyKind::BACKGROUND)
        );
        assert!(scan.self_registration.is_some());
    }

    #[test]
    fn test_scan_unknown_type_is_empty() {
        let inspector = TypeInspector::new().with::<Widget>();
        let object: ObjectRef = Arc::new(Unknown);

        assert!(inspector.scan(&object).is_empty());
    }
}
