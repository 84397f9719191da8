//! A registered event sink bound to a topic.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::BrokerResult;
use crate::extension::ExtensionHost;
use crate::handler::{BoundCallable, HandlerMethod, HandlerResult, HandlerShape, ResolvedCallable};
use crate::matcher::Matcher;
use crate::object::{ObjectKey, WeakObject};
use crate::payload::PayloadType;
use crate::strategy::{ExecutionStrategy, Invocation, StrategyContext, StrategyKind};

/// One subscriber handler registered on one topic.
///
/// Identity on a topic is the pair (subscriber, handler name).
pub struct Subscription {
    id: Uuid,
    topic: Arc<str>,
    subscriber: WeakObject,
    callable: BoundCallable,
    payload_type: PayloadType,
    strategy: Box<dyn ExecutionStrategy>,
    matchers: Vec<Arc<dyn Matcher>>,
}

impl Subscription {
    /// Bind `method` to `subscriber` and initialize `strategy` for it.
    pub(crate) fn new(
        topic: Arc<str>,
        subscriber: WeakObject,
        method: HandlerMethod,
        mut strategy: Box<dyn ExecutionStrategy>,
        matchers: Vec<Arc<dyn Matcher>>,
        extensions: &Arc<ExtensionHost>,
    ) -> BrokerResult<Self> {
        let (callable, payload_type) = BoundCallable::bind(subscriber.clone(), method)?;

        strategy.initialize(&StrategyContext {
            topic: &topic,
            subscriber: &subscriber,
            handler: callable.method().name(),
            shape: callable.shape(),
            extensions,
        });

        Ok(Self {
            id: Uuid::new_v4(),
            topic,
            subscriber,
            callable,
            payload_type,
            strategy,
            matchers,
        })
    }

    /// Unique id of this subscription instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// URI of the owning topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The subscriber, held weakly.
    #[must_use]
    pub fn subscriber(&self) -> &WeakObject {
        &self.subscriber
    }

    /// Handler method name.
    #[must_use]
    pub fn handler_name(&self) -> &str {
        self.callable.method().name()
    }

    /// Shape of the bound handler.
    #[must_use]
    pub fn shape(&self) -> HandlerShape {
        self.callable.shape()
    }

    /// Payload type the handler declares.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Kind of the bound execution strategy.
    #[must_use]
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Subscription-scoped matchers.
    #[must_use]
    pub fn matchers(&self) -> &[Arc<dyn Matcher>] {
        &self.matchers
    }

    /// Whether the subscriber is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.subscriber.is_alive()
    }

    pub(crate) fn same_identity(&self, subscriber: ObjectKey, handler: &str) -> bool {
        self.subscriber.key() == subscriber && self.handler_name() == handler
    }

    pub(crate) fn resolve(&self) -> Option<ResolvedCallable> {
        self.callable.resolve()
    }

    pub(crate) fn invoke(&self, invocation: Invocation, callable: ResolvedCallable) -> HandlerResult {
        self.strategy.invoke(invocation, callable)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("subscriber", &self.subscriber)
            .field("handler", &self.handler_name())
            .field("payload_type", &self.payload_type)
            .field("strategy", &self.strategy_kind())
            .field("matchers", &self.matchers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::BrokerError;
    use crate::handler::{Param, Receiver};
    use crate::object::Sender;
    use crate::payload::Payload;

    #[derive(Default)]
    struct Listener {
        seen: Mutex<Vec<u32>>,
    }

    /// Records what `initialize` was told.
    #[derive(Default)]
    struct Probe {
        seen: Arc<Mutex<Option<(String, String, HandlerShape)>>>,
    }

    impl ExecutionStrategy for Probe {
        fn kind(&self) -> StrategyKind {
            StrategyKind::new("probe")
        }

        fn initialize(&mut self, context: &StrategyContext<'_>) {
            *self.seen.lock().unwrap() = Some((
                context.topic.to_string(),
                context.handler.to_string(),
                context.shape,
            ));
        }

        fn invoke(&self, invocation: Invocation, callable: ResolvedCallable) -> HandlerResult {
            callable.call(&invocation)
        }
    }

    #[test]
    fn test_new_initializes_strategy() {
        let listener = Arc::new(Listener::default());
        let probe = Probe::default();
        let seen = Arc::clone(&probe.seen);

        let subscription = Subscription::new(
            "ui.button".into(),
            WeakObject::new(&listener),
            HandlerMethod::payload("on_click", |l: &Listener, x: &u32| {
                l.seen.lock().unwrap().push(*x);
                Ok(())
            }),
            Box::new(probe),
            Vec::new(),
            &Arc::new(ExtensionHost::new()),
        )
        .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            Some((
                "ui.button".to_string(),
                "on_click".to_string(),
                HandlerShape::PayloadOnly
            ))
        );
        assert_eq!(subscription.strategy_kind(), StrategyKind::new("probe"));
        assert_eq!(subscription.payload_type(), PayloadType::of::<u32>());
        assert!(subscription.same_identity(ObjectKey::of(&listener), "on_click"));

        let callable = subscription.resolve().unwrap();
        subscription
            .invoke(
                Invocation::new("ui.button", Sender::none(), Payload::new(4_u32)),
                callable,
            )
            .unwrap();
        assert_eq!(*listener.seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_new_rejects_static_handler() {
        let listener = Arc::new(Listener::default());
        let err = Subscription::new(
            "ui.button".into(),
            WeakObject::new(&listener),
            HandlerMethod::from_parts(
                "on_static",
                Receiver::Static,
                vec![Param::Sender],
                |_, _| Ok(()),
            ),
            Box::new(Probe::default()),
            Vec::new(),
            &Arc::new(ExtensionHost::new()),
        )
        .err()
        .unwrap();

        assert!(matches!(err, BrokerError::StaticHandler { .. }));
    }
}
