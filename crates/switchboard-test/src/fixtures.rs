//! Publisher and subscriber fixtures.
//!
//! A [`Button`] publishes [`ClickArgs`] on a topic (`ui.button1` unless
//! overridden). [`Listener`] records every click it receives and
//! [`ThrowingListener`] fails with [`InvalidOperation`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use switchboard_broker::{
    Broker, BrokerResult, EventSource, FireSummary, HandlerMethod, Inspectable, MatcherRef,
    PublicationDescriptor, Scan, Sender, StrategyKind, SubscriptionDescriptor, TypeInspector,
};

/// Topic used by fixtures that are not given one.
pub const BUTTON_TOPIC: &str = "ui.button1";

/// Payload raised by a [`Button`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickArgs {
    /// Horizontal click position.
    pub x: i32,
}

/// A publisher with one `clicked` event.
#[derive(Debug)]
pub struct Button {
    /// The click event.
    pub clicked: EventSource<ClickArgs>,
    topic: String,
    restriction: Option<StrategyKind>,
}

impl Button {
    /// A button publishing on [`BUTTON_TOPIC`].
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::on(BUTTON_TOPIC)
    }

    /// A button publishing on `topic`.
    #[must_use]
    pub fn on(topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            clicked: EventSource::new("clicked"),
            topic: topic.into(),
            restriction: None,
        })
    }

    /// A button whose publication only admits subscribers using `kind`.
    #[must_use]
    pub fn restricted(topic: impl Into<String>, kind: StrategyKind) -> Arc<Self> {
        Arc::new(Self {
            clicked: EventSource::new("clicked"),
            topic: topic.into(),
            restriction: Some(kind),
        })
    }

    /// Raise `clicked` with the given position.
    ///
    /// # Errors
    ///
    /// Propagates an unhandled synchronous subscriber failure.
    pub fn click(&self, x: i32) -> BrokerResult<FireSummary> {
        self.clicked.raise(ClickArgs { x })
    }

    /// Topic this button publishes on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Inspectable for Button {
    fn inspect(this: &Arc<Self>, scan: &mut Scan) {
        let mut descriptor = PublicationDescriptor::new(this.topic.clone(), &this.clicked);
        if let Some(kind) = &this.restriction {
            descriptor = descriptor.restricted_to(kind.clone());
        }
        scan.publish(descriptor);
    }
}

/// A subscriber recording every click it receives.
#[derive(Debug)]
pub struct Listener {
    topic: String,
    strategy: Option<StrategyKind>,
    matchers: Vec<String>,
    clicks: Mutex<Vec<i32>>,
    senders: Mutex<Vec<bool>>,
    threads: Mutex<Vec<(ThreadId, Option<String>)>>,
}

impl Listener {
    /// A listener on [`BUTTON_TOPIC`] using the broker's default strategy.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(BUTTON_TOPIC, None, Vec::new())
    }

    /// A listener on `topic`.
    #[must_use]
    pub fn on(topic: impl Into<String>) -> Arc<Self> {
        Self::build(topic, None, Vec::new())
    }

    /// A listener on `topic` using the given strategy kind.
    #[must_use]
    pub fn with_strategy(topic: impl Into<String>, kind: StrategyKind) -> Arc<Self> {
        Self::build(topic, Some(kind), Vec::new())
    }

    /// A listener on `topic` filtered by named matchers.
    #[must_use]
    pub fn with_matchers(topic: impl Into<String>, matchers: &[&str]) -> Arc<Self> {
        Self::build(
            topic,
            None,
            matchers.iter().map(|m| (*m).to_owned()).collect(),
        )
    }

    fn build(topic: impl Into<String>, strategy: Option<StrategyKind>, matchers: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.into(),
            strategy,
            matchers,
            clicks: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// The click handler as a [`HandlerMethod`].
    #[must_use]
    pub fn handler() -> HandlerMethod {
        HandlerMethod::sender_and_payload(
            "on_click",
            |listener: &Listener, sender: &Sender, args: &ClickArgs| {
                listener.record(args.x, sender.downcast_ref::<Button>().is_some());
                Ok(())
            },
        )
    }

    fn record(&self, x: i32, from_button: bool) {
        lock(&self.clicks).push(x);
        lock(&self.senders).push(from_button);
        let current = thread::current();
        lock(&self.threads).push((current.id(), current.name().map(str::to_owned)));
    }

    /// Click positions received, in arrival order.
    #[must_use]
    pub fn clicks(&self) -> Vec<i32> {
        lock(&self.clicks).clone()
    }

    /// Number of clicks received.
    #[must_use]
    pub fn click_count(&self) -> usize {
        lock(&self.clicks).len()
    }

    /// Whether every delivery carried a [`Button`] as sender.
    #[must_use]
    pub fn all_from_button(&self) -> bool {
        lock(&self.senders).iter().all(|b| *b)
    }

    /// Threads each click was handled on.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadId> {
        lock(&self.threads).iter().map(|(id, _)| *id).collect()
    }

    /// Names of the threads each click was handled on.
    #[must_use]
    pub fn thread_names(&self) -> Vec<Option<String>> {
        lock(&self.threads).iter().map(|(_, name)| name.clone()).collect()
    }
}

impl Inspectable for Listener {
    fn inspect(this: &Arc<Self>, scan: &mut Scan) {
        let mut descriptor = SubscriptionDescriptor::new(this.topic.clone(), Self::handler());
        if let Some(kind) = &this.strategy {
            descriptor = descriptor.strategy(kind.clone());
        }
        for name in &this.matchers {
            descriptor = descriptor.matcher(MatcherRef::named(name.clone()));
        }
        scan.subscribe(descriptor);
    }
}

/// Error raised by [`ThrowingListener`].
#[derive(Debug, thiserror::Error)]
#[error("invalid operation: {0}")]
pub struct InvalidOperation(pub String);

/// A subscriber whose handler always fails.
#[derive(Debug)]
pub struct ThrowingListener {
    topic: String,
    attempts: AtomicUsize,
}

impl ThrowingListener {
    /// A throwing listener on [`BUTTON_TOPIC`].
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::on(BUTTON_TOPIC)
    }

    /// A throwing listener on `topic`.
    #[must_use]
    pub fn on(topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.into(),
            attempts: AtomicUsize::new(0),
        })
    }

    /// How many times the handler ran.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Inspectable for ThrowingListener {
    fn inspect(this: &Arc<Self>, scan: &mut Scan) {
        scan.subscribe(SubscriptionDescriptor::new(
            this.topic.clone(),
            HandlerMethod::payload("explode", |listener: &ThrowingListener, args: &ClickArgs| {
                listener.attempts.fetch_add(1, Ordering::SeqCst);
                Err(InvalidOperation(format!("click at {}", args.x)).into())
            }),
        ));
    }
}

/// Inspector knowing every fixture type.
#[must_use]
pub fn fixture_inspector() -> TypeInspector {
    TypeInspector::new()
        .with::<Button>()
        .with::<Listener>()
        .with::<ThrowingListener>()
}

/// A broker using [`fixture_inspector`] and default settings.
///
/// # Panics
///
/// Panics if the broker cannot be built.
#[must_use]
pub fn fixture_broker() -> Broker {
    Broker::builder()
        .inspector(fixture_inspector())
        .build()
        .expect("fixture broker builds")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
