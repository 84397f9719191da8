//! Observers of broker lifecycle and firing events.
//!
//! Extensions are notified synchronously on the thread performing the
//! operation. They cannot veto anything: a panicking extension is caught,
//! logged and skipped. The only influence an extension has is through
//! [`BrokerExtension::subscriber_exception`], which may replace a handler
//! failure or mark it handled.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, trace, warn};

use crate::handler::panic_message;
use crate::object::ObjectKey;
use crate::payload::Payload;
use crate::publication::Publication;
use crate::subscription::Subscription;
use crate::topic::{FireSummary, Topic};

/// Summary of one object registered or unregistered through the registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredItem {
    /// Identity of the object.
    pub key: ObjectKey,
    /// Type name of the object.
    pub type_name: &'static str,
    /// Publications added or removed.
    pub publications: usize,
    /// Subscriptions added or removed.
    pub subscriptions: usize,
}

/// A subscriber failure being offered to extensions.
///
/// Extensions may swap the error or mark it handled. An unhandled failure
/// from a synchronous handler is returned to whoever raised the event.
pub struct ExceptionContext {
    topic: Arc<str>,
    handler: String,
    subscriber: ObjectKey,
    error: anyhow::Error,
    handled: bool,
}

impl ExceptionContext {
    /// Create an unhandled context.
    #[must_use]
    pub fn new(
        topic: impl Into<Arc<str>>,
        handler: impl Into<String>,
        subscriber: ObjectKey,
        error: anyhow::Error,
    ) -> Self {
        Self {
            topic: topic.into(),
            handler: handler.into(),
            subscriber,
            error,
            handled: false,
        }
    }

    /// Topic the failing handler was relayed from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Name of the failing handler.
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Identity of the subscriber.
    #[must_use]
    pub fn subscriber(&self) -> ObjectKey {
        self.subscriber
    }

    /// The failure.
    #[must_use]
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Replace the failure.
    pub fn set_error(&mut self, error: anyhow::Error) {
        self.error = error;
    }

    /// Whether an extension marked the failure handled.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Set or clear the handled flag.
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    /// Mark the failure handled.
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Consume the context, returning the (possibly replaced) failure.
    #[must_use]
    pub fn into_error(self) -> anyhow::Error {
        self.error
    }
}

impl fmt::Debug for ExceptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionContext")
            .field("topic", &self.topic)
            .field("handler", &self.handler)
            .field("subscriber", &self.subscriber)
            .field("error", &format_args!("{:#}", self.error))
            .field("handled", &self.handled)
            .finish()
    }
}

/// Receives broker notifications. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait BrokerExtension: Send + Sync {
    /// Name used in logs and for removal.
    fn name(&self) -> &str;

    /// A topic was created by the topic host.
    fn topic_created(&self, topic: &Topic) {}

    /// A publication was constructed and is about to be added.
    fn publication_created(&self, publication: &Publication) {}

    /// A publication was added to a topic.
    fn publication_added(&self, topic: &Topic, publication: &Publication) {}

    /// A publication was removed, explicitly or because its publisher died.
    fn publication_removed(&self, topic: &Topic, publication: &Publication) {}

    /// A subscription was constructed and is about to be added.
    fn subscription_created(&self, subscription: &Subscription) {}

    /// A subscription was added to a topic.
    fn subscription_added(&self, topic: &Topic, subscription: &Subscription) {}

    /// A subscription was removed, explicitly or because its subscriber died.
    fn subscription_removed(&self, topic: &Topic, subscription: &Subscription) {}

    /// A firing started.
    fn firing(&self, topic: &Topic, publication: &Publication, payload: &Payload) {}

    /// A firing completed.
    fn fired(&self, topic: &Topic, publication: &Publication, summary: &FireSummary) {}

    /// An event is about to be handed to a subscription's strategy.
    fn relaying(&self, topic: &Topic, publication: &Publication, subscription: &Subscription) {}

    /// An event was handed to a subscription's strategy.
    fn relayed(&self, topic: &Topic, publication: &Publication, subscription: &Subscription) {}

    /// An event was not relayed because the named matchers rejected it.
    fn skipped(
        &self,
        topic: &Topic,
        publication: &Publication,
        subscription: &Subscription,
        failed: &[String],
    ) {
    }

    /// An object was registered.
    fn registered(&self, item: &RegisteredItem) {}

    /// An object was unregistered.
    fn unregistered(&self, item: &RegisteredItem) {}

    /// A subscriber handler failed.
    fn subscriber_exception(&self, context: &mut ExceptionContext) {}
}

/// Fan-out of notifications to every installed extension.
pub struct ExtensionHost {
    extensions: ArcSwap<Vec<Arc<dyn BrokerExtension>>>,
}

impl ExtensionHost {
    /// Create a host with no extensions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extensions: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Install an extension.
    pub fn add(&self, extension: Arc<dyn BrokerExtension>) {
        debug!(extension = %extension.name(), "Installing broker extension");
        self.extensions.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&extension));
            next
        });
    }

    /// Remove every extension called `name`. Returns whether any was removed.
    pub fn remove(&self, name: &str) -> bool {
        let previous = self.extensions.rcu(|current| {
            current
                .iter()
                .filter(|extension| extension.name() != name)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|extension| extension.name() == name)
    }

    /// Number of installed extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.load().len()
    }

    /// Whether no extension is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.load().is_empty()
    }

    /// Call `notify` on every extension, isolating panics.
    pub(crate) fn notify<F>(&self, notify: F)
    where
        F: Fn(&dyn BrokerExtension),
    {
        let extensions = self.extensions.load();
        for extension in extensions.iter() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| notify(extension.as_ref()))) {
                warn!(
                    extension = %extension.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Broker extension panicked"
                );
            }
        }
    }

    /// Offer a subscriber failure to every extension.
    pub fn offer_exception(&self, context: &mut ExceptionContext) {
        let extensions = self.extensions.load();
        for extension in extensions.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| {
                extension.subscriber_exception(context);
            }));
            if let Err(panic) = result {
                warn!(
                    extension = %extension.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Broker extension panicked while handling a subscriber failure"
                );
            }
        }
    }
}

impl Default for ExtensionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .extensions
            .load()
            .iter()
            .map(|extension| extension.name().to_string())
            .collect();
        f.debug_struct("ExtensionHost")
            .field("extensions", &names)
            .finish()
    }
}

/// Logs every notification through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExtension;

impl TracingExtension {
    /// Create the extension.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BrokerExtension for TracingExtension {
    fn name(&self) -> &str {
        "tracing"
    }

    fn topic_created(&self, topic: &Topic) {
        debug!(topic = %topic.uri(), "Topic created");
    }

    fn publication_added(&self, topic: &Topic, publication: &Publication) {
        debug!(
            topic = %topic.uri(),
            event_name = %publication.event_name(),
            publisher = %publication.publisher().key(),
            "Publication added"
        );
    }

    fn publication_removed(&self, topic: &Topic, publication: &Publication) {
        debug!(
            topic = %topic.uri(),
            event_name = %publication.event_name(),
            "Publication removed"
        );
    }

    fn subscription_added(&self, topic: &Topic, subscription: &Subscription) {
        debug!(
            topic = %topic.uri(),
            handler = %subscription.handler_name(),
            strategy = %subscription.strategy_kind(),
            "Subscription added"
        );
    }

    fn subscription_removed(&self, topic: &Topic, subscription: &Subscription) {
        debug!(
            topic = %topic.uri(),
            handler = %subscription.handler_name(),
            "Subscription removed"
        );
    }

    fn firing(&self, topic: &Topic, publication: &Publication, payload: &Payload) {
        trace!(
            topic = %topic.uri(),
            event_name = %publication.event_name(),
            payload_type = %payload.payload_type(),
            "Firing"
        );
    }

    fn fired(&self, topic: &Topic, publication: &Publication, summary: &FireSummary) {
        trace!(
            topic = %topic.uri(),
            event_name = %publication.event_name(),
            relayed = summary.relayed,
            skipped = summary.skipped,
            "Fired"
        );
    }

    fn relayed(&self, topic: &Topic, _publication: &Publication, subscription: &Subscription) {
        trace!(
            topic = %topic.uri(),
            handler = %subscription.handler_name(),
            strategy = %subscription.strategy_kind(),
            "Relayed"
        );
    }

    fn skipped(
        &self,
        topic: &Topic,
        _publication: &Publication,
        subscription: &Subscription,
        failed: &[String],
    ) {
        trace!(
            topic = %topic.uri(),
            handler = %subscription.handler_name(),
            failed = ?failed,
            "Skipped"
        );
    }

    fn registered(&self, item: &RegisteredItem) {
        debug!(
            object = %item.key,
            type_name = item.type_name,
            publications = item.publications,
            subscriptions = item.subscriptions,
            "Object registered"
        );
    }

    fn unregistered(&self, item: &RegisteredItem) {
        debug!(
            object = %item.key,
            type_name = item.type_name,
            publications = item.publications,
            subscriptions = item.subscriptions,
            "Object unregistered"
        );
    }

    fn subscriber_exception(&self, context: &mut ExceptionContext) {
        debug!(
            topic = %context.topic(),
            handler = %context.handler(),
            error = %format!("{:#}", context.error()),
            "Subscriber failed"
        );
    }
}
