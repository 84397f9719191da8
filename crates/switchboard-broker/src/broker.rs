//! Broker assembly.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{BrokerError, BrokerResult};
use crate::extension::{BrokerExtension, ExtensionHost, RegisteredItem, TracingExtension};
use crate::host::TopicHost;
use crate::inspector::{Inspector, TypeInspector};
use crate::matcher::{Matcher, MatcherFactory};
use crate::registrar::Registrar;
use crate::strategy::{
    Background, Dispatcher, ExecutionStrategy, Marshaled, StrategyFactory, StrategyKind,
    Synchronous, WorkerPool,
};
use crate::topic::Topic;

/// An in-process event broker.
///
/// Owns the topic host, the registrar and the extension host. Dropping the
/// broker tears every topic down, unbinding all publications.
pub struct Broker {
    registrar: Registrar,
}

impl Broker {
    /// Create a broker with default settings.
    ///
    /// The synchronous strategy is always available. The background strategy
    /// is available when called from within a tokio runtime, whose blocking
    /// pool it then uses. Use [`Broker::builder`] for anything else.
    #[must_use]
    pub fn new() -> Self {
        BrokerBuilder::new().assemble(WorkerPool::current())
    }

    /// Start configuring a broker.
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Build a broker from configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configured default strategy is unknown or the worker
    /// pool cannot be started.
    #[cfg(feature = "config")]
    pub fn from_config(config: &switchboard_config::Config) -> BrokerResult<Self> {
        BrokerBuilder::from_config(config).build()
    }

    /// The mutation API.
    #[must_use]
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// The topic registry.
    #[must_use]
    pub fn topics(&self) -> &Arc<TopicHost> {
        self.registrar.host()
    }

    /// The extension host.
    #[must_use]
    pub fn extensions(&self) -> &Arc<ExtensionHost> {
        self.registrar.host().extensions()
    }

    /// Get the topic for `uri`, creating it if needed.
    #[must_use]
    pub fn topic(&self, uri: &str) -> Arc<Topic> {
        self.topics().get_topic(uri)
    }

    /// Register everything the inspector finds on `object`.
    ///
    /// # Errors
    ///
    /// See [`Registrar::register`].
    pub fn register<T>(&self, object: &Arc<T>) -> BrokerResult<RegisteredItem>
    where
        T: Any + Send + Sync,
    {
        self.registrar.register(object)
    }

    /// Remove everything the inspector finds on `object`.
    ///
    /// # Errors
    ///
    /// See [`Registrar::unregister`].
    pub fn unregister<T>(&self, object: &Arc<T>) -> BrokerResult<RegisteredItem>
    where
        T: Any + Send + Sync,
    {
        self.registrar.unregister(object)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.topics().teardown();
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("registrar", &self.registrar)
            .field("extensions", self.extensions())
            .finish()
    }
}

/// Where background handlers will run.
enum PoolSource {
    Current,
    Given(WorkerPool),
    Owned { threads: usize, name: String },
}

/// Builder for [`Broker`].
pub struct BrokerBuilder {
    inspector: Option<Arc<dyn Inspector>>,
    extensions: Vec<Arc<dyn BrokerExtension>>,
    matchers: MatcherFactory,
    strategies: Vec<(StrategyKind, Arc<dyn Fn() -> Box<dyn ExecutionStrategy> + Send + Sync>)>,
    pool: PoolSource,
    dispatcher: Option<Dispatcher>,
    default_strategy: StrategyKind,
    global_matchers: Vec<Arc<dyn Matcher>>,
}

impl BrokerBuilder {
    /// Start from defaults: synchronous default strategy, no extensions,
    /// an inspector that knows no types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inspector: None,
            extensions: Vec::new(),
            matchers: MatcherFactory::new(),
            strategies: Vec::new(),
            pool: PoolSource::Current,
            dispatcher: None,
            default_strategy: StrategyKind::SYNCHRONOUS,
            global_matchers: Vec::new(),
        }
    }

    /// Start from configuration.
    #[cfg(feature = "config")]
    #[must_use]
    pub fn from_config(config: &switchboard_config::Config) -> Self {
        let mut builder = Self::new()
            .default_strategy(StrategyKind::from(config.broker.default_strategy.clone()))
            .worker_threads(
                config.background.worker_threads,
                config.background.thread_name.clone(),
            );
        if config.broker.trace_events {
            builder = builder.extension(Arc::new(TracingExtension::new()));
        }
        builder
    }

    /// Use `inspector` for object registration.
    #[must_use]
    pub fn inspector(mut self, inspector: impl Inspector + 'static) -> Self {
        self.inspector = Some(Arc::new(inspector));
        self
    }

    /// Install an extension.
    #[must_use]
    pub fn extension(mut self, extension: Arc<dyn BrokerExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Install the [`TracingExtension`].
    #[must_use]
    pub fn trace_events(self) -> Self {
        self.extension(Arc::new(TracingExtension::new()))
    }

    /// Register a named matcher constructor.
    #[must_use]
    pub fn matcher<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn Matcher> + Send + Sync + 'static,
    {
        self.matchers.register(name, constructor);
        self
    }

    /// Add a matcher applied to every firing.
    #[must_use]
    pub fn global_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.global_matchers.push(matcher);
        self
    }

    /// Register a strategy constructor, overriding a built-in of the same kind.
    #[must_use]
    pub fn strategy<F>(mut self, kind: StrategyKind, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn ExecutionStrategy> + Send + Sync + 'static,
    {
        self.strategies.push((kind, Arc::new(constructor)));
        self
    }

    /// Run background handlers on `pool`.
    #[must_use]
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = PoolSource::Given(pool);
        self
    }

    /// Run background handlers on a dedicated runtime started at build time.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize, thread_name: impl Into<String>) -> Self {
        self.pool = PoolSource::Owned {
            threads,
            name: thread_name.into(),
        };
        self
    }

    /// Enable the marshaled strategy on `dispatcher`.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Strategy kind used by subscription descriptors that name none.
    #[must_use]
    pub fn default_strategy(mut self, kind: StrategyKind) -> Self {
        self.default_strategy = kind;
        self
    }

    /// Build the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::WorkerPool`] if a dedicated worker runtime
    /// cannot be started and [`BrokerError::UnknownStrategy`] if the default
    /// strategy kind has no constructor.
    pub fn build(mut self) -> BrokerResult<Broker> {
        let pool = match std::mem::replace(&mut self.pool, PoolSource::Current) {
            PoolSource::Current => WorkerPool::current(),
            PoolSource::Given(pool) => Some(pool),
            PoolSource::Owned { threads, name } => Some(WorkerPool::with_threads(threads, &name)?),
        };

        let strategies = self.strategy_factory(pool.clone());
        if !strategies.contains(&self.default_strategy) {
            return Err(BrokerError::UnknownStrategy {
                kind: self.default_strategy.to_string(),
            });
        }
        Ok(self.assemble(pool))
    }

    fn strategy_factory(&self, pool: Option<WorkerPool>) -> StrategyFactory {
        let mut factory = StrategyFactory::new()
            .with(StrategyKind::SYNCHRONOUS, || Box::new(Synchronous::new()));
        if let Some(pool) = pool {
            factory.register(StrategyKind::BACKGROUND, move || {
                Box::new(Background::new(pool.clone()))
            });
        }
        if let Some(dispatcher) = self.dispatcher.clone() {
            factory.register(StrategyKind::MARSHALED, move || {
                Box::new(Marshaled::new(dispatcher.clone()))
            });
        }
        for (kind, constructor) in &self.strategies {
            let constructor = Arc::clone(constructor);
            factory.register(kind.clone(), move || constructor());
        }
        factory
    }

    /// Build with an already resolved pool. Falls back to the synchronous
    /// default if the requested default kind is unavailable.
    fn assemble(self, pool: Option<WorkerPool>) -> Broker {
        let strategies = self.strategy_factory(pool);
        let default_strategy = if strategies.contains(&self.default_strategy) {
            self.default_strategy
        } else {
            StrategyKind::SYNCHRONOUS
        };

        let extensions = Arc::new(ExtensionHost::new());
        for extension in self.extensions {
            extensions.add(extension);
        }

        let host = Arc::new(TopicHost::new(extensions));
        for matcher in self.global_matchers {
            host.add_global_matcher(matcher);
        }

        let inspector = self
            .inspector
            .unwrap_or_else(|| Arc::new(TypeInspector::new()));

        info!(
            strategies = ?strategies.kinds(),
            default_strategy = %default_strategy,
            "Broker ready"
        );
        debug!(matchers = ?self.matchers, "Matcher factory");

        Broker {
            registrar: Registrar::new(host, inspector, strategies, self.matchers, default_strategy),
        }
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BrokerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerBuilder")
            .field("extensions", &self.extensions.len())
            .field("matchers", &self.matchers)
            .field("dispatcher", &self.dispatcher)
            .field("default_strategy", &self.default_strategy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::handler::HandlerMethod;
    use crate::source::EventSource;

    struct Button {
        clicked: EventSource<u32>,
    }

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    #[test]
    fn test_new_broker_offers_synchronous_only_outside_runtime() {
        let broker = Broker::new();
        let kinds = broker.registrar().strategies().kinds();

        assert_eq!(kinds, vec![StrategyKind::SYNCHRONOUS]);
        assert_eq!(broker.registrar().default_strategy(), &StrategyKind::SYNCHRONOUS);
    }

    #[test]
    fn test_build_rejects_unknown_default() {
        let err = Broker::builder()
            .default_strategy(StrategyKind::MARSHALED)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BrokerError::UnknownStrategy { ref kind } if kind == "marshaled"));

        let (dispatcher, _loop) = Dispatcher::channel();
        let broker = Broker::builder()
            .dispatcher(dispatcher)
            .default_strategy(StrategyKind::MARSHALED)
            .build()
            .unwrap();
        assert_eq!(broker.registrar().default_strategy(), &StrategyKind::MARSHALED);
    }

    #[test]
    fn test_dropping_broker_unbinds_sources() {
        let button = Arc::new(Button {
            clicked: EventSource::new("clicked"),
        });
        let counter = Arc::new(Counter::default());

        {
            let broker = Broker::new();
            broker
                .registrar()
                .add_publication("ui.button", &button, &button.clicked, None, [])
                .unwrap();
            broker
                .registrar()
                .add_subscription(
                    "ui.button",
                    &counter,
                    HandlerMethod::no_args("on_any", |c: &Counter| {
                        c.hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    &StrategyKind::SYNCHRONOUS,
                    [],
                )
                .unwrap();
            button.clicked.raise(1).unwrap();
            assert!(button.clicked.is_bound());
        }

        assert!(!button.clicked.is_bound());
        button.clicked.raise(1).unwrap();
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_strategy_and_global_matcher() {
        let broker = Broker::builder()
            .strategy(StrategyKind::new("inline"), || Box::new(Synchronous::new()))
            .global_matcher(Arc::new(crate::matcher::Never))
            .build()
            .unwrap();

        assert!(broker.registrar().strategies().contains(&StrategyKind::new("inline")));
        assert_eq!(broker.topics().global_matchers().len(), 1);
    }
}
