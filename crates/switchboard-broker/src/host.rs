//! The topic registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::extension::ExtensionHost;
use crate::matcher::{Matcher, MatcherSet};
use crate::topic::{Topic, TopicContext};

/// Maps topic URIs to topics, creating each topic on first use.
///
/// Lookups read an immutable map without locking. A miss takes the
/// registry lock, checks again and publishes a copy of the map with the new
/// topic, so concurrent first uses of one URI all observe the same topic.
pub struct TopicHost {
    topics: ArcSwap<HashMap<Arc<str>, Arc<Topic>>>,
    create_lock: Mutex<()>,
    context: Arc<TopicContext>,
}

impl TopicHost {
    /// Create an empty host reporting to `extensions`.
    #[must_use]
    pub fn new(extensions: Arc<ExtensionHost>) -> Self {
        Self {
            topics: ArcSwap::from_pointee(HashMap::new()),
            create_lock: Mutex::new(()),
            context: Arc::new(TopicContext {
                extensions,
                global_matchers: Arc::new(MatcherSet::new()),
            }),
        }
    }

    /// Get the topic for `uri`, creating it if needed.
    pub fn get_topic(&self, uri: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.load().get(uri) {
            return Arc::clone(topic);
        }

        let guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.topics.load_full();
        if let Some(topic) = current.get(uri) {
            return Arc::clone(topic);
        }

        let topic = Topic::new(Arc::from(uri), Arc::clone(&self.context));
        let mut next = HashMap::clone(&current);
        next.insert(topic.uri_arc(), Arc::clone(&topic));
        self.topics.store(Arc::new(next));
        drop(guard);

        debug!(topic = %uri, "Created topic");
        self.context
            .extensions
            .notify(|e| e.topic_created(&topic));
        topic
    }

    /// Get the topic for `uri` without creating it.
    #[must_use]
    pub fn topic(&self, uri: &str) -> Option<Arc<Topic>> {
        self.topics.load().get(uri).cloned()
    }

    /// URIs of every topic, sorted.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.topics.load().keys().map(|uri| uri.to_string()).collect();
        uris.sort();
        uris
    }

    /// Number of topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.load().len()
    }

    /// Whether no topic exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.load().is_empty()
    }

    /// Extension host shared by every topic.
    #[must_use]
    pub fn extensions(&self) -> &Arc<ExtensionHost> {
        &self.context.extensions
    }

    /// Add a matcher applied to every firing on every topic.
    pub fn add_global_matcher(&self, matcher: Arc<dyn Matcher>) {
        debug!(matcher = %matcher.name(), "Adding global matcher");
        self.context.global_matchers.add(matcher);
    }

    /// Remove global matchers called `name`. Returns whether any was removed.
    pub fn remove_global_matcher(&self, name: &str) -> bool {
        self.context.global_matchers.remove(name)
    }

    /// Current global matchers.
    #[must_use]
    pub fn global_matchers(&self) -> Arc<Vec<Arc<dyn Matcher>>> {
        self.context.global_matchers.snapshot()
    }

    /// Dispose every topic and forget them.
    ///
    /// Not safe to race with [`get_topic`](Self::get_topic) or firings; the
    /// caller must ensure the broker is quiescent.
    pub fn teardown(&self) {
        let _guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let topics = self.topics.swap(Arc::new(HashMap::new()));
        for topic in topics.values() {
            topic.dispose();
        }
        debug!(topics = topics.len(), "Tore down topic host");
    }
}

impl fmt::Debug for TopicHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicHost")
            .field("topics", &self.uris())
            .field("global_matchers", &self.context.global_matchers)
            .finish()
    }
}
