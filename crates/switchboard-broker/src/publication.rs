//! A registered event source bound to a topic.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use uuid::Uuid;

use crate::matcher::Matcher;
use crate::object::{ObjectKey, WeakObject};
use crate::payload::PayloadType;
use crate::source::{SinkId, SourceHandle};
use crate::strategy::StrategyKind;
use crate::topic::Topic;

/// One publisher event registered on one topic.
///
/// Identity on a topic is the pair (publisher, event name).
pub struct Publication {
    id: Uuid,
    topic: Arc<str>,
    publisher: WeakObject,
    source: SourceHandle,
    restriction: Option<StrategyKind>,
    matchers: Vec<Arc<dyn Matcher>>,
    binding: Mutex<Option<SinkId>>,
}

impl Publication {
    pub(crate) fn new(
        topic: Arc<str>,
        publisher: WeakObject,
        source: SourceHandle,
        restriction: Option<StrategyKind>,
        matchers: Vec<Arc<dyn Matcher>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            publisher,
            source,
            restriction,
            matchers,
            binding: Mutex::new(None),
        }
    }

    /// Unique id of this publication instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// URI of the owning topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The publisher, held weakly.
    #[must_use]
    pub fn publisher(&self) -> &WeakObject {
        &self.publisher
    }

    /// Event source name.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.source.name()
    }

    /// Type of payloads raised.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        self.source.payload_type()
    }

    /// Strategy kind every subscription must use, if restricted.
    #[must_use]
    pub fn restriction(&self) -> Option<&StrategyKind> {
        self.restriction.as_ref()
    }

    /// Publication-scoped matchers.
    #[must_use]
    pub fn matchers(&self) -> &[Arc<dyn Matcher>] {
        &self.matchers
    }

    /// Whether the publisher is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.publisher.is_alive()
    }

    /// Whether the publication is bound to its event source.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn same_identity(&self, publisher: ObjectKey, event_name: &str) -> bool {
        self.publisher.key() == publisher && self.event_name() == event_name
    }

    /// Bind the event source so raising it fires `topic`. Idempotent.
    pub(crate) fn bind(this: &Arc<Self>, topic: Weak<Topic>) {
        let mut binding = this.binding.lock().unwrap_or_else(PoisonError::into_inner);
        if binding.is_none() {
            *binding = Some(this.source.bind(topic, Arc::downgrade(this)));
        }
    }

    /// Release the event source binding. Idempotent.
    pub(crate) fn unbind(&self) {
        let mut binding = self.binding.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = binding.take() {
            self.source.unbind(id);
        }
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("publisher", &self.publisher)
            .field("event_name", &self.event_name())
            .field("payload_type", &self.payload_type())
            .field("restriction", &self.restriction)
            .field("matchers", &self.matchers)
            .finish()
    }
}
