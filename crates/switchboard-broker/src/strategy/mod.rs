//! Execution strategies decide on which thread, and when, a matched
//! subscription's handler runs.
//!
//! A strategy is created per subscription, initialized once with the
//! subscription it serves and then asked to invoke the bound callable for
//! every matched firing. Three strategies ship with the broker:
//!
//! - [`Synchronous`]: inline on the firing thread.
//! - [`Background`]: queued onto a [`WorkerPool`].
//! - [`Marshaled`]: posted to the thread pumping a [`DispatchLoop`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{BrokerError, BrokerResult};
use crate::extension::{ExceptionContext, ExtensionHost};
use crate::handler::{HandlerResult, HandlerShape, ResolvedCallable};
use crate::object::{ObjectKey, Sender, WeakObject};
use crate::payload::Payload;

mod background;
mod marshaled;
mod synchronous;

pub use background::{Background, WorkerPool};
pub use marshaled::{DispatchLoop, Dispatcher, Marshaled};
pub use synchronous::Synchronous;

/// Kind of an execution strategy, compared against publication handler restrictions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyKind(Cow<'static, str>);

impl StrategyKind {
    /// Inline on the firing thread.
    pub const SYNCHRONOUS: Self = Self(Cow::Borrowed("synchronous"));
    /// Deferred to a worker pool.
    pub const BACKGROUND: Self = Self(Cow::Borrowed("background"));
    /// Marshaled to a designated dispatch thread.
    pub const MARSHALED: Self = Self(Cow::Borrowed("marshaled"));

    /// A custom kind.
    #[must_use]
    pub fn new(kind: impl Into<Cow<'static, str>>) -> Self {
        Self(kind.into())
    }

    /// The kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for StrategyKind {
    fn from(kind: &'static str) -> Self {
        Self(Cow::Borrowed(kind))
    }
}

impl From<String> for StrategyKind {
    fn from(kind: String) -> Self {
        Self(Cow::Owned(kind))
    }
}

/// One matched firing, as handed to a strategy.
#[derive(Debug, Clone)]
pub struct Invocation {
    topic: Arc<str>,
    sender: Sender,
    payload: Payload,
}

impl Invocation {
    /// Create an invocation.
    #[must_use]
    pub fn new(topic: impl Into<Arc<str>>, sender: Sender, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            sender,
            payload,
        }
    }

    /// Topic URI the event was fired on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Object that raised the event.
    #[must_use]
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Event payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// What a strategy learns about its subscription at initialization.
#[derive(Debug)]
pub struct StrategyContext<'a> {
    /// Topic URI.
    pub topic: &'a str,
    /// The subscriber.
    pub subscriber: &'a WeakObject,
    /// Handler method name.
    pub handler: &'a str,
    /// Shape of the bound handler.
    pub shape: HandlerShape,
    /// Extension host to report deferred failures to.
    pub extensions: &'a Arc<ExtensionHost>,
}

/// A pluggable dispatch policy for one subscription.
pub trait ExecutionStrategy: Send + Sync {
    /// Kind reported for handler-restriction checks.
    fn kind(&self) -> StrategyKind;

    /// Called once when the subscription is created.
    fn initialize(&mut self, context: &StrategyContext<'_>) {
        let _ = context;
    }

    /// Run `callable` for `invocation`.
    ///
    /// Implementations must eventually call `callable` exactly once, either
    /// before returning or on another thread. Errors returned here are
    /// offered to the extension host by the firing topic.
    ///
    /// # Errors
    ///
    /// Returns the handler's failure when it ran synchronously.
    fn invoke(&self, invocation: Invocation, callable: ResolvedCallable) -> HandlerResult;
}

type StrategyConstructor = Arc<dyn Fn() -> Box<dyn ExecutionStrategy> + Send + Sync>;

/// Constructors for strategies, keyed by kind.
#[derive(Clone, Default)]
pub struct StrategyFactory {
    constructors: HashMap<StrategyKind, StrategyConstructor>,
}

impl StrategyFactory {
    /// Create an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for `kind`.
    pub fn register<F>(&mut self, kind: StrategyKind, constructor: F)
    where
        F: Fn() -> Box<dyn ExecutionStrategy> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    /// Register a constructor, builder style.
    #[must_use]
    pub fn with<F>(mut self, kind: StrategyKind, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn ExecutionStrategy> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Create a fresh, uninitialized strategy of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownStrategy`] if no constructor is registered.
    pub fn create(&self, kind: &StrategyKind) -> BrokerResult<Box<dyn ExecutionStrategy>> {
        self.constructors
            .get(kind)
            .map(|constructor| constructor())
            .ok_or_else(|| BrokerError::UnknownStrategy {
                kind: kind.to_string(),
            })
    }

    /// Whether a constructor is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: &StrategyKind) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<StrategyKind> {
        let mut kinds: Vec<_> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for StrategyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Reports failures of handlers that ran away from the firing thread.
///
/// There is no caller left to return the error to, so the failure is offered
/// to the extension host and logged if nobody handles it.
#[derive(Clone)]
pub(crate) struct FailureReporter {
    extensions: Arc<ExtensionHost>,
    subscriber: ObjectKey,
    handler: String,
    kind: StrategyKind,
}

impl FailureReporter {
    pub(crate) fn new(context: &StrategyContext<'_>, kind: StrategyKind) -> Self {
        Self {
            extensions: Arc::clone(context.extensions),
            subscriber: context.subscriber.key(),
            handler: context.handler.to_string(),
            kind,
        }
    }

    pub(crate) fn report(&self, topic: &str, error: anyhow::Error) {
        let mut context =
            ExceptionContext::new(topic, self.handler.clone(), self.subscriber, error);
        self.extensions.offer_exception(&mut context);

        if !context.is_handled() {
            warn!(
                topic = %topic,
                handler = %self.handler,
                strategy = %self.kind,
                error = %format!("{:#}", context.error()),
                "Unhandled failure in deferred subscriber"
            );
        }
    }
}

/// Report through `reporter` if the strategy was initialized, otherwise just log.
pub(crate) fn report_deferred(
    reporter: Option<&FailureReporter>,
    kind: &StrategyKind,
    topic: &str,
    error: anyhow::Error,
) {
    match reporter {
        Some(reporter) => reporter.report(topic, error),
        None => warn!(
            topic = %topic,
            strategy = %kind,
            error = %format!("{error:#}"),
            "Unhandled failure in uninitialized deferred strategy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_equality_and_display() {
        assert_eq!(StrategyKind::SYNCHRONOUS, StrategyKind::new("synchronous"));
        assert_eq!(
            StrategyKind::from("background".to_string()),
            StrategyKind::BACKGROUND
        );
        assert_ne!(StrategyKind::MARSHALED, StrategyKind::BACKGROUND);
        assert_eq!(StrategyKind::MARSHALED.to_string(), "marshaled");
    }

    #[test]
    fn test_factory_create_and_unknown() {
        let factory = StrategyFactory::new()
            .with(StrategyKind::SYNCHRONOUS, || Box::new(Synchronous::new()));

        assert!(factory.contains(&StrategyKind::SYNCHRONOUS));
        assert_eq!(
            factory.create(&StrategyKind::SYNCHRONOUS).unwrap().kind(),
            StrategyKind::SYNCHRONOUS
        );

        let err = factory.create(&StrategyKind::new("ui")).err().unwrap();
        assert!(matches!(err, BrokerError::UnknownStrategy { ref kind } if kind == "ui"));
    }

    #[test]
    fn test_factory_kinds_sorted() {
        let factory = StrategyFactory::new()
            .with(StrategyKind::SYNCHRONOUS, || Box::new(Synchronous::new()))
            .with(StrategyKind::new("custom"), || Box::new(Synchronous::new()));

        assert_eq!(
            factory.kinds(),
            vec![StrategyKind::new("custom"), StrategyKind::SYNCHRONOUS]
        );
    }
}
