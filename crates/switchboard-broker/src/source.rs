//! Event sources embedded in publisher objects.
//!
//! An [`EventSource`] is the publisher's end of a publication. Adding a
//! publication binds a sink into the source; raising the source fires every
//! bound topic. Sinks hold the topic and publication weakly, so a source
//! never keeps broker state alive.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use tracing::trace;

use crate::error::BrokerResult;
use crate::object::Sender;
use crate::payload::{Payload, PayloadType};
use crate::publication::Publication;
use crate::topic::{FireSummary, Topic};

/// Identifies one bound sink within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SinkId(u64);

struct Sink {
    id: SinkId,
    topic: Weak<Topic>,
    publication: Weak<Publication>,
}

impl Sink {
    fn deliver(&self, payload: &Payload) -> BrokerResult<FireSummary> {
        let (Some(topic), Some(publication)) = (self.topic.upgrade(), self.publication.upgrade())
        else {
            return Ok(FireSummary::default());
        };
        // A dead publisher is pruned by the topic on its next operation.
        let Some(publisher) = publication.publisher().upgrade() else {
            return Ok(FireSummary::default());
        };
        topic.fire(&Sender::new(publisher), payload, &publication)
    }
}

struct SourceCore {
    name: Cow<'static, str>,
    payload_type: PayloadType,
    sinks: ArcSwap<Vec<Arc<Sink>>>,
    next_id: AtomicU64,
}

/// A named event raised by a publisher, carrying payloads of type `T`.
pub struct EventSource<T> {
    core: Arc<SourceCore>,
    _payload: PhantomData<fn(T)>,
}

impl<T: Any + Send + Sync> EventSource<T> {
    /// Create an unbound source. The name identifies the event on a topic.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            core: Arc::new(SourceCore {
                name: name.into(),
                payload_type: PayloadType::of::<T>(),
                sinks: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
            _payload: PhantomData,
        }
    }

    /// Raise the event on every bound topic.
    ///
    /// Topics are fired in binding order. Raising an unbound source does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the first unhandled synchronous handler failure; topics after
    /// the failing one are not fired.
    pub fn raise(&self, payload: T) -> BrokerResult<FireSummary> {
        let payload = Payload::new(payload);
        let sinks = self.core.sinks.load_full();
        trace!(
            event_name = %self.core.name,
            sinks = sinks.len(),
            "Raising event"
        );

        let mut summary = FireSummary::default();
        for sink in sinks.iter() {
            summary.merge(sink.deliver(&payload)?);
        }
        Ok(summary)
    }
}

impl<T> EventSource<T> {
    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether any topic is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.core.sinks.load().is_empty()
    }

    /// Type-erased handle for descriptors.
    #[must_use]
    pub fn handle(&self) -> SourceHandle {
        SourceHandle(Arc::clone(&self.core))
    }
}

impl<T> fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("name", &self.core.name)
            .field("payload_type", &self.core.payload_type)
            .field("sinks", &self.core.sinks.load().len())
            .finish()
    }
}

/// Type-erased handle to an [`EventSource`].
#[derive(Clone)]
pub struct SourceHandle(Arc<SourceCore>);

impl SourceHandle {
    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Type of payloads the source raises.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        self.0.payload_type
    }

    /// Number of bound topics.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.0.sinks.load().len()
    }

    pub(crate) fn bind(&self, topic: Weak<Topic>, publication: Weak<Publication>) -> SinkId {
        let id = SinkId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
        let sink = Arc::new(Sink {
            id,
            topic,
            publication,
        });
        self.0.sinks.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&sink));
            next
        });
        id
    }

    pub(crate) fn unbind(&self, id: SinkId) {
        self.0.sinks.rcu(|current| {
            current
                .iter()
                .filter(|sink| sink.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

impl<T> From<&EventSource<T>> for SourceHandle {
    fn from(source: &EventSource<T>) -> Self {
        source.handle()
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("name", &self.0.name)
            .field("payload_type", &self.0.payload_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_source_raise_is_noop() {
        let source = EventSource::<u32>::new("clicked");
        assert!(!source.is_bound());
        assert_eq!(source.raise(1).unwrap(), FireSummary::default());
    }

    #[test]
    fn test_handle_reports_name_and_type() {
        let source = EventSource::<String>::new("renamed");
        let handle = SourceHandle::from(&source);

        assert_eq!(handle.name(), "renamed");
        assert_eq!(handle.payload_type(), PayloadType::of::<String>());
    }

    #[test]
    fn test_bind_and_unbind_sinks() {
        let source = EventSource::<u32>::new("clicked");
        let handle = source.handle();

        let first = handle.bind(Weak::new(), Weak::new());
        let second = handle.bind(Weak::new(), Weak::new());
        assert_ne!(first, second);
        assert_eq!(handle.sink_count(), 2);
        assert!(source.is_bound());

        handle.unbind(first);
        assert_eq!(handle.sink_count(), 1);

        // Sinks whose topic is gone deliver nothing.
        assert_eq!(source.raise(3).unwrap(), FireSummary::default());
    }
}
