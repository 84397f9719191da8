//! Recording and failure-handling extensions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use switchboard_broker::{
    BrokerExtension, ExceptionContext, FireSummary, Payload, Publication, RegisteredItem,
    Subscription, Topic,
};

/// One notification captured by [`RecordingExtension`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A topic was created.
    TopicCreated(String),
    /// A publication was constructed.
    PublicationCreated {
        /// Topic URI.
        topic: String,
        /// Event source name.
        event: String,
    },
    /// A publication joined a topic.
    PublicationAdded {
        /// Topic URI.
        topic: String,
        /// Event source name.
        event: String,
    },
    /// A publication left a topic.
    PublicationRemoved {
        /// Topic URI.
        topic: String,
        /// Event source name.
        event: String,
    },
    /// A subscription was constructed.
    SubscriptionCreated {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
    },
    /// A subscription joined a topic.
    SubscriptionAdded {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
    },
    /// A subscription left a topic.
    SubscriptionRemoved {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
    },
    /// A firing started.
    Firing(String),
    /// A firing completed.
    Fired {
        /// Topic URI.
        topic: String,
        /// Outcome of the firing.
        summary: FireSummary,
    },
    /// An event is about to be relayed.
    Relaying {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
    },
    /// An event was relayed.
    Relayed {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
    },
    /// An event was filtered out.
    Skipped {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
        /// Matchers that rejected the event.
        failed: Vec<String>,
    },
    /// An object was registered.
    Registered(RegisteredItem),
    /// An object was unregistered.
    Unregistered(RegisteredItem),
    /// A subscriber failed.
    SubscriberException {
        /// Topic URI.
        topic: String,
        /// Handler method name.
        handler: String,
        /// Rendered failure.
        message: String,
    },
}

/// Extension appending every notification to an in-memory log.
#[derive(Debug, Default)]
pub struct RecordingExtension {
    log: Mutex<Vec<Notification>>,
}

impl RecordingExtension {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of recorded notifications satisfying `predicate`.
    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|n| predicate(n))
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, notification: Notification) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

impl BrokerExtension for RecordingExtension {
    fn name(&self) -> &str {
        "recording"
    }

    fn topic_created(&self, topic: &Topic) {
        self.push(Notification::TopicCreated(topic.uri().to_owned()));
    }

    fn publication_created(&self, publication: &Publication) {
        self.push(Notification::PublicationCreated {
            topic: publication.topic().to_owned(),
            event: publication.event_name().to_owned(),
        });
    }

    fn publication_added(&self, topic: &Topic, publication: &Publication) {
        self.push(Notification::PublicationAdded {
            topic: topic.uri().to_owned(),
            event: publication.event_name().to_owned(),
        });
    }

    fn publication_removed(&self, topic: &Topic, publication: &Publication) {
        self.push(Notification::PublicationRemoved {
            topic: topic.uri().to_owned(),
            event: publication.event_name().to_owned(),
        });
    }

    fn subscription_created(&self, subscription: &Subscription) {
        self.push(Notification::SubscriptionCreated {
            topic: subscription.topic().to_owned(),
            handler: subscription.handler_name().to_owned(),
        });
    }

    fn subscription_added(&self, topic: &Topic, subscription: &Subscription) {
        self.push(Notification::SubscriptionAdded {
            topic: topic.uri().to_owned(),
            handler: subscription.handler_name().to_owned(),
        });
    }

    fn subscription_removed(&self, topic: &Topic, subscription: &Subscription) {
        self.push(Notification::SubscriptionRemoved {
            topic: topic.uri().to_owned(),
            handler: subscription.handler_name().to_owned(),
        });
    }

    fn firing(&self, topic: &Topic, _publication: &Publication, _payload: &Payload) {
        self.push(Notification::Firing(topic.uri().to_owned()));
    }

    fn fired(&self, topic: &Topic, _publication: &Publication, summary: &FireSummary) {
        self.push(Notification::Fired {
            topic: topic.uri().to_owned(),
            summary: *summary,
        });
    }

    fn relaying(&self, topic: &Topic, _publication: &Publication, subscription: &Subscription) {
        self.push(Notification::Relaying {
            topic: topic.uri().to_owned(),
            handler: subscription.handler_name().to_owned(),
        });
    }

    fn relayed(&self, topic: &Topic, _publication: &Publication, subscription: &Subscription) {
        self.push(Notification::Relayed {
            topic: topic.uri().to_owned(),
            handler: subscription.handler_name().to_owned(),
        });
    }

    fn skipped(
        &self,
        topic: &Topic,
        _publication: &Publication,
        subscription: &Subscription,
        failed: &[String],
    ) {
        self.push(Notification::Skipped {
            topic: topic.uri().to_owned(),
            handler: subscription.handler_name().to_owned(),
            failed: failed.to_vec(),
        });
    }

    fn registered(&self, item: &RegisteredItem) {
        self.push(Notification::Registered(item.clone()));
    }

    fn unregistered(&self, item: &RegisteredItem) {
        self.push(Notification::Unregistered(item.clone()));
    }

    fn subscriber_exception(&self, context: &mut ExceptionContext) {
        self.push(Notification::SubscriberException {
            topic: context.topic().to_owned(),
            handler: context.handler().to_owned(),
            message: format!("{:#}", context.error()),
        });
    }
}

/// Extension marking every subscriber failure handled.
#[derive(Debug, Default)]
pub struct HandlingExtension {
    handled: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl HandlingExtension {
    /// Create a handler with no failures seen.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many failures were marked handled.
    #[must_use]
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    /// Rendered failures, in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BrokerExtension for HandlingExtension {
    fn name(&self) -> &str {
        "handling"
    }

    fn subscriber_exception(&self, context: &mut ExceptionContext) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(context.error().to_string());
        self.handled.fetch_add(1, Ordering::SeqCst);
        context.mark_handled();
    }
}
