//! The public mutation API.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::extension::{ExtensionHost, RegisteredItem};
use crate::handler::HandlerMethod;
use crate::host::TopicHost;
use crate::inspector::{Inspector, PublicationDescriptor, Scan, SubscriptionDescriptor};
use crate::matcher::{MatcherFactory, MatcherRef};
use crate::object::{ObjectKey, ObjectRef, WeakObject};
use crate::publication::Publication;
use crate::source::{EventSource, SourceHandle};
use crate::strategy::{ExecutionStrategy, StrategyFactory, StrategyKind};
use crate::subscription::Subscription;
use crate::topic::Topic;

/// An item added while registering one object, kept for rollback.
enum Added {
    Publication(Arc<Topic>, String),
    Subscription(Arc<Topic>, String),
}

/// Adds and removes publications and subscriptions.
///
/// Every call resolves its topic through the [`TopicHost`], creating the
/// topic on first use. Validation errors are returned synchronously and
/// leave the topic unchanged.
pub struct Registrar {
    host: Arc<TopicHost>,
    inspector: Arc<dyn Inspector>,
    strategies: StrategyFactory,
    matchers: MatcherFactory,
    default_strategy: StrategyKind,
}

impl Registrar {
    pub(crate) fn new(
        host: Arc<TopicHost>,
        inspector: Arc<dyn Inspector>,
        strategies: StrategyFactory,
        matchers: MatcherFactory,
        default_strategy: StrategyKind,
    ) -> Self {
        Self {
            host,
            inspector,
            strategies,
            matchers,
            default_strategy,
        }
    }

    /// The topic host.
    #[must_use]
    pub fn host(&self) -> &Arc<TopicHost> {
        &self.host
    }

    /// Strategy kind used by descriptors that name none.
    #[must_use]
    pub fn default_strategy(&self) -> &StrategyKind {
        &self.default_strategy
    }

    /// Registered strategy constructors.
    #[must_use]
    pub fn strategies(&self) -> &StrategyFactory {
        &self.strategies
    }

    /// Registered matcher constructors.
    #[must_use]
    pub fn matchers(&self) -> &MatcherFactory {
        &self.matchers
    }

    fn extensions(&self) -> &Arc<ExtensionHost> {
        self.host.extensions()
    }

    /// Publish `source`, raised by `publisher`, on `topic`.
    ///
    /// # Errors
    ///
    /// Fails on unknown matcher names and on any topic invariant violation.
    pub fn add_publication<P, T>(
        &self,
        topic: &str,
        publisher: &Arc<P>,
        source: &EventSource<T>,
        restriction: Option<StrategyKind>,
        matchers: impl IntoIterator<Item = MatcherRef>,
    ) -> BrokerResult<Arc<Publication>>
    where
        P: Any + Send + Sync,
    {
        let matchers: Vec<MatcherRef> = matchers.into_iter().collect();
        self.publish(
            topic,
            WeakObject::new(publisher),
            source.handle(),
            restriction,
            &matchers,
        )
    }

    fn publish(
        &self,
        uri: &str,
        publisher: WeakObject,
        source: SourceHandle,
        restriction: Option<StrategyKind>,
        matchers: &[MatcherRef],
    ) -> BrokerResult<Arc<Publication>> {
        let matchers = self.matchers.resolve_all(matchers)?;
        let topic = self.host.get_topic(uri);
        let publication = Arc::new(Publication::new(
            topic.uri_arc(),
            publisher,
            source,
            restriction,
            matchers,
        ));
        self.extensions()
            .notify(|e| e.publication_created(&publication));

        topic.add_publication(Arc::clone(&publication))?;
        Ok(publication)
    }

    /// Remove the publication of `event_name` by `publisher` from `topic`.
    pub fn remove_publication<P>(
        &self,
        topic: &str,
        publisher: &Arc<P>,
        event_name: &str,
    ) -> Option<Arc<Publication>>
    where
        P: Any + Send + Sync,
    {
        self.host
            .topic(topic)?
            .remove_publication(ObjectKey::of(publisher), event_name)
    }

    /// Subscribe `handler` of `subscriber` to `topic`, run by a new strategy of `kind`.
    ///
    /// # Errors
    ///
    /// Fails on unknown strategy kinds or matcher names, on unsupported or
    /// static handlers, and on any topic invariant violation.
    pub fn add_subscription<S>(
        &self,
        topic: &str,
        subscriber: &Arc<S>,
        handler: HandlerMethod,
        kind: &StrategyKind,
        matchers: impl IntoIterator<Item = MatcherRef>,
    ) -> BrokerResult<Arc<Subscription>>
    where
        S: Any + Send + Sync,
    {
        let strategy = self.strategies.create(kind)?;
        self.add_subscription_with_strategy(topic, subscriber, handler, strategy, matchers)
    }

    /// Subscribe `handler` of `subscriber` to `topic`, run by `strategy`.
    ///
    /// # Errors
    ///
    /// As [`add_subscription`](Self::add_subscription), minus unknown kinds.
    pub fn add_subscription_with_strategy<S>(
        &self,
        topic: &str,
        subscriber: &Arc<S>,
        handler: HandlerMethod,
        strategy: Box<dyn ExecutionStrategy>,
        matchers: impl IntoIterator<Item = MatcherRef>,
    ) -> BrokerResult<Arc<Subscription>>
    where
        S: Any + Send + Sync,
    {
        let matchers: Vec<MatcherRef> = matchers.into_iter().collect();
        self.subscribe(
            topic,
            WeakObject::new(subscriber),
            handler,
            strategy,
            &matchers,
        )
    }

    fn subscribe(
        &self,
        uri: &str,
        subscriber: WeakObject,
        handler: HandlerMethod,
        strategy: Box<dyn ExecutionStrategy>,
        matchers: &[MatcherRef],
    ) -> BrokerResult<Arc<Subscription>> {
        let matchers = self.matchers.resolve_all(matchers)?;
        let topic = self.host.get_topic(uri);
        let subscription = Arc::new(Subscription::new(
            topic.uri_arc(),
            subscriber,
            handler,
            strategy,
            matchers,
            self.extensions(),
        )?);
        self.extensions()
            .notify(|e| e.subscription_created(&subscription));

        topic.add_subscription(Arc::clone(&subscription))?;
        Ok(subscription)
    }

    /// Remove the subscription of `handler` by `subscriber` from `topic`.
    pub fn remove_subscription<S>(
        &self,
        topic: &str,
        subscriber: &Arc<S>,
        handler: &str,
    ) -> Option<Arc<Subscription>>
    where
        S: Any + Send + Sync,
    {
        self.host
            .topic(topic)?
            .remove_subscription(ObjectKey::of(subscriber), handler)
    }

    /// Register everything the inspector finds on `object`.
    ///
    /// Publications are added first, then subscriptions, then the object's
    /// self-registration hook runs. If any step fails, the items already
    /// added for this object are removed again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first registration error, or
    /// [`BrokerError::SelfRegistration`] if the hook fails.
    pub fn register<T>(&self, object: &Arc<T>) -> BrokerResult<RegisteredItem>
    where
        T: Any + Send + Sync,
    {
        let erased: ObjectRef = Arc::clone(object) as ObjectRef;
        self.register_object(&erased, type_name::<T>())
    }

    fn register_object(
        &self,
        object: &ObjectRef,
        type_name: &'static str,
    ) -> BrokerResult<RegisteredItem> {
        let scan = self.inspector.scan(object);
        let weak = WeakObject::from_erased(object, type_name);
        let mut added = Vec::new();

        if let Err(error) = self.add_described(&weak, &scan, &mut added) {
            self.rollback(weak.key(), added);
            return Err(error);
        }

        if let Some(hook) = &scan.self_registration
            && let Err(error) = hook.on_register(self)
        {
            self.rollback(weak.key(), added);
            return Err(BrokerError::SelfRegistration {
                type_name: type_name.to_string(),
                error,
            });
        }

        let item = RegisteredItem {
            key: weak.key(),
            type_name,
            publications: scan.publications.len(),
            subscriptions: scan.subscriptions.len(),
        };
        debug!(
            object = %item.key,
            type_name = type_name,
            publications = item.publications,
            subscriptions = item.subscriptions,
            "Registered object"
        );
        self.extensions().notify(|e| e.registered(&item));
        Ok(item)
    }

    fn add_described(
        &self,
        object: &WeakObject,
        scan: &Scan,
        added: &mut Vec<Added>,
    ) -> BrokerResult<()> {
        for PublicationDescriptor {
            topic,
            source,
            restriction,
            matchers,
        } in &scan.publications
        {
            let publication = self.publish(
                topic,
                object.clone(),
                source.clone(),
                restriction.clone(),
                matchers,
            )?;
            added.push(Added::Publication(
                self.host.get_topic(topic),
                publication.event_name().to_string(),
            ));
        }

        for SubscriptionDescriptor {
            topic,
            handler,
            strategy,
            matchers,
        } in &scan.subscriptions
        {
            let kind = strategy.as_ref().unwrap_or(&self.default_strategy);
            let strategy = self.strategies.create(kind)?;
            let subscription =
                self.subscribe(topic, object.clone(), handler.clone(), strategy, matchers)?;
            added.push(Added::Subscription(
                self.host.get_topic(topic),
                subscription.handler_name().to_string(),
            ));
        }
        Ok(())
    }

    fn rollback(&self, key: ObjectKey, added: Vec<Added>) {
        if added.is_empty() {
            return;
        }
        warn!(
            object = %key,
            items = added.len(),
            "Rolling back partial registration"
        );
        for item in added.into_iter().rev() {
            match item {
                Added::Publication(topic, event_name) => {
                    topic.remove_publication(key, &event_name);
                },
                Added::Subscription(topic, handler) => {
                    topic.remove_subscription(key, &handler);
                },
            }
        }
    }

    /// Remove everything the inspector finds on `object`.
    ///
    /// The object's self-unregistration hook runs first. Descriptors whose
    /// topic or item no longer exists are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SelfRegistration`] if the hook fails, in which
    /// case nothing is removed.
    pub fn unregister<T>(&self, object: &Arc<T>) -> BrokerResult<RegisteredItem>
    where
        T: Any + Send + Sync,
    {
        let erased: ObjectRef = Arc::clone(object) as ObjectRef;
        let scan = self.inspector.scan(&erased);
        let key = ObjectKey::of(object);

        if let Some(hook) = &scan.self_registration {
            hook.on_unregister(self)
                .map_err(|error| BrokerError::SelfRegistration {
                    type_name: type_name::<T>().to_string(),
                    error,
                })?;
        }

        let publications = scan
            .publications
            .iter()
            .filter_map(|descriptor| {
                self.host
                    .topic(&descriptor.topic)?
                    .remove_publication(key, descriptor.source.name())
            })
            .count();
        let subscriptions = scan
            .subscriptions
            .iter()
            .filter_map(|descriptor| {
                self.host
                    .topic(&descriptor.topic)?
                    .remove_subscription(key, descriptor.handler.name())
            })
            .count();

        let item = RegisteredItem {
            key,
            type_name: type_name::<T>(),
            publications,
            subscriptions,
        };
        debug!(
            object = %key,
            type_name = item.type_name,
            publications = publications,
            subscriptions = subscriptions,
            "Unregistered object"
        );
        self.extensions().notify(|e| e.unregistered(&item));
        Ok(item)
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("host", &self.host)
            .field("strategies", &self.strategies)
            .field("matchers", &self.matchers)
            .field("default_strategy", &self.default_strategy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::inspector::{Inspectable, TypeInspector};
    use crate::payload::DataEvent;
    use crate::strategy::Synchronous;

    struct Button {
        clicked: EventSource<u32>,
    }

    impl Inspectable for Button {
        fn inspect(this: &Arc<Self>, scan: &mut Scan) {
            scan.publish(PublicationDescriptor::new("ui.button", &this.clicked));
        }
    }

    #[derive(Default)]
    struct Listener {
        hits: AtomicUsize,
    }

    impl Inspectable for Listener {
        fn inspect(_this: &Arc<Self>, scan: &mut Scan) {
            scan.subscribe(SubscriptionDescriptor::new(
                "ui.button",
                HandlerMethod::payload("on_click", |l: &Listener, _: &u32| {
                    l.hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ));
        }
    }

    /// Subscribes to two topics; the second one carries another payload type.
    struct Conflicted;

    impl Inspectable for Conflicted {
        fn inspect(_this: &Arc<Self>, scan: &mut Scan) {
            scan.subscribe(SubscriptionDescriptor::new(
                "ui.fresh",
                HandlerMethod::payload("on_fresh", |_: &Conflicted, _: &u32| Ok(())),
            ))
            .subscribe(SubscriptionDescriptor::new(
                "ui.button",
                HandlerMethod::value("on_text", |_: &Conflicted, _: &String| Ok(())),
            ));
        }
    }

    struct Refusing;

    impl Inspectable for Refusing {
        fn inspect(_this: &Arc<Self>, scan: &mut Scan) {
            scan.subscribe(SubscriptionDescriptor::new(
                "ui.button",
                HandlerMethod::no_args("on_any", |_: &Refusing| Ok(())),
            ));
        }

        fn on_register(_this: &Arc<Self>, _registrar: &Registrar) -> anyhow::Result<()> {
            anyhow::bail!("not today")
        }
    }

    fn registrar() -> Registrar {
        let inspector = TypeInspector::new()
            .with::<Button>()
            .with::<Listener>()
            .with::<Conflicted>()
            .with::<Refusing>();
        Registrar::new(
            Arc::new(TopicHost::new(Arc::new(ExtensionHost::new()))),
            Arc::new(inspector),
            StrategyFactory::new().with(StrategyKind::SYNCHRONOUS, || Box::new(Synchronous::new())),
            MatcherFactory::new(),
            StrategyKind::SYNCHRONOUS,
        )
    }

    #[test]
    fn test_register_and_unregister_objects() {
        let registrar = registrar();
        let button = Arc::new(Button {
            clicked: EventSource::new("clicked"),
        });
        let listener = Arc::new(Listener::default());

        let item = registrar.register(&button).unwrap();
        assert_eq!(item.publications, 1);
        registrar.register(&listener).unwrap();

        button.clicked.raise(10).unwrap();
        assert_eq!(listener.hits.load(Ordering::SeqCst), 1);

        let item = registrar.unregister(&listener).unwrap();
        assert_eq!(item.subscriptions, 1);
        button.clicked.raise(10).unwrap();
        assert_eq!(listener.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_rolls_back_on_failure() {
        let registrar = registrar();
        let button = Arc::new(Button {
            clicked: EventSource::new("clicked"),
        });
        registrar.register(&button).unwrap();

        let conflicted = Arc::new(Conflicted);
        let err = registrar.register(&conflicted).unwrap_err();

        assert!(matches!(err, BrokerError::IncompatiblePayload { .. }));
        let fresh = registrar.host().topic("ui.fresh").unwrap();
        assert_eq!(fresh.subscription_count(), 0);
        assert_eq!(
            registrar.host().topic("ui.button").unwrap().subscription_count(),
            0
        );
    }

    #[test]
    fn test_failing_self_registration_rolls_back() {
        let registrar = registrar();
        let refusing = Arc::new(Refusing);

        let err = registrar.register(&refusing).unwrap_err();

        assert!(matches!(err, BrokerError::SelfRegistration { .. }));
        assert!(err.to_string().contains("not today"));
        assert_eq!(
            registrar.host().topic("ui.button").unwrap().subscription_count(),
            0
        );
    }

    #[test]
    fn test_imperative_paths_and_unknown_names() {
        let registrar = registrar();
        let button = Arc::new(Button {
            clicked: EventSource::new("clicked"),
        });
        let listener = Arc::new(Listener::default());

        let err = registrar
            .add_publication("ui.x", &button, &button.clicked, None, [MatcherRef::named("odd")])
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownMatcher { .. }));

        let err = registrar
            .add_subscription(
                "ui.x",
                &listener,
                HandlerMethod::no_args("on_any", |_: &Listener| Ok(())),
                &StrategyKind::BACKGROUND,
                [],
            )
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownStrategy { .. }));

        registrar
            .add_publication("ui.x", &button, &button.clicked, None, [])
            .unwrap();
        registrar
            .add_subscription(
                "ui.x",
                &listener,
                HandlerMethod::value("on_value", |_: &Listener, _: &u32| Ok(())),
                &StrategyKind::SYNCHRONOUS,
                [],
            )
            .map(|_| ())
            .unwrap_err();

        assert!(registrar.remove_publication("ui.x", &button, "clicked").is_some());
        assert!(registrar.remove_publication("ui.missing", &button, "clicked").is_none());
        assert!(registrar.remove_subscription("ui.x", &listener, "on_any").is_none());

        // Without the publication the value handler is accepted.
        let subscription = registrar
            .add_subscription(
                "ui.x",
                &listener,
                HandlerMethod::value("on_value", |_: &Listener, _: &u32| Ok(())),
                &StrategyKind::SYNCHRONOUS,
                [],
            )
            .unwrap();
        assert_eq!(
            subscription.payload_type(),
            crate::payload::PayloadType::of::<DataEvent<u32>>()
        );
    }
}
