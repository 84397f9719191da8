//! Topics: the live publications and subscriptions of one URI.
//!
//! Both lists are immutable snapshots swapped atomically. Readers, including
//! every firing, load the current snapshot without locking and always see
//! either the list before or after a mutation. Writers serialize on a
//! per-topic mutex while producing the next snapshot, so independent topics
//! never contend.
//!
//! Entries whose publisher or subscriber has been dropped are pruned lazily
//! at the start of every mutation and firing.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use tracing::{debug, trace};

use crate::error::{BrokerError, BrokerResult};
use crate::extension::{ExceptionContext, ExtensionHost};
use crate::matcher::{MatcherSet, evaluate};
use crate::object::{ObjectKey, Sender};
use crate::payload::Payload;
use crate::publication::Publication;
use crate::strategy::Invocation;
use crate::subscription::Subscription;

/// Outcome of one firing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireSummary {
    /// Subscriptions the event was handed to.
    pub relayed: usize,
    /// Subscriptions whose matchers rejected the event.
    pub skipped: usize,
}

impl FireSummary {
    /// Add another summary's counts to this one.
    pub fn merge(&mut self, other: FireSummary) {
        self.relayed = self.relayed.saturating_add(other.relayed);
        self.skipped = self.skipped.saturating_add(other.skipped);
    }
}

/// State shared by every topic of one host.
#[derive(Debug)]
pub(crate) struct TopicContext {
    pub(crate) extensions: Arc<ExtensionHost>,
    pub(crate) global_matchers: Arc<MatcherSet>,
}

#[derive(Default)]
struct Pruned {
    publications: Vec<Arc<Publication>>,
    subscriptions: Vec<Arc<Subscription>>,
}

impl Pruned {
    fn is_empty(&self) -> bool {
        self.publications.is_empty() && self.subscriptions.is_empty()
    }
}

/// Named channel holding the live publications and subscriptions for one URI.
pub struct Topic {
    uri: Arc<str>,
    this: Weak<Topic>,
    publications: ArcSwap<Vec<Arc<Publication>>>,
    subscriptions: ArcSwap<Vec<Arc<Subscription>>>,
    write_lock: Mutex<()>,
    context: Arc<TopicContext>,
}

impl Topic {
    pub(crate) fn new(uri: Arc<str>, context: Arc<TopicContext>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            uri,
            this: Weak::clone(this),
            publications: ArcSwap::from_pointee(Vec::new()),
            subscriptions: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            context,
        })
    }

    /// Topic URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn uri_arc(&self) -> Arc<str> {
        Arc::clone(&self.uri)
    }

    /// Current publication snapshot, in insertion order.
    #[must_use]
    pub fn publications(&self) -> Arc<Vec<Arc<Publication>>> {
        self.publications.load_full()
    }

    /// Current subscription snapshot, in insertion order.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<Vec<Arc<Subscription>>> {
        self.subscriptions.load_full()
    }

    /// Number of publications, including ones not yet pruned.
    #[must_use]
    pub fn publication_count(&self) -> usize {
        self.publications.load().len()
    }

    /// Number of subscriptions, including ones not yet pruned.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load().len()
    }

    /// Total number of publications and subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.publication_count()
            .saturating_add(self.subscription_count())
    }

    /// Whether the topic holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a publication and bind it to its event source.
    ///
    /// # Errors
    ///
    /// Fails without changing the topic when the publisher already has a
    /// publication for the same event, when a subscription cannot accept
    /// its payload type, or when a subscription's strategy kind violates
    /// its handler restriction.
    pub fn add_publication(&self, publication: Arc<Publication>) -> BrokerResult<()> {
        let guard = self.lock();
        let pruned = self.prune_locked();

        let result = self.validate_publication(&publication).map(|()| {
            Publication::bind(&publication, Weak::clone(&self.this));
            let current = self.publications.load();
            let mut next = Vec::with_capacity(current.len().saturating_add(1));
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&publication));
            self.publications.store(Arc::new(next));
        });

        drop(guard);
        self.notify_pruned(&pruned);
        result?;

        debug!(
            topic = %self.uri,
            event_name = %publication.event_name(),
            publisher = %publication.publisher().key(),
            "Added publication"
        );
        self.context
            .extensions
            .notify(|e| e.publication_added(self, &publication));
        Ok(())
    }

    fn validate_publication(&self, publication: &Publication) -> BrokerResult<()> {
        let key = publication.publisher().key();
        if self
            .publications
            .load()
            .iter()
            .any(|existing| existing.same_identity(key, publication.event_name()))
        {
            return Err(BrokerError::DuplicatePublication {
                topic: self.uri.to_string(),
                event_name: publication.event_name().to_string(),
            });
        }

        let actual = publication.payload_type();
        for subscription in self.subscriptions.load().iter() {
            if !subscription.payload_type().accepts(&actual) {
                return Err(BrokerError::IncompatiblePayload {
                    topic: self.uri.to_string(),
                    expected: subscription.payload_type().to_string(),
                    actual: actual.to_string(),
                });
            }
            if let Some(required) = publication.restriction() {
                let kind = subscription.strategy_kind();
                if kind != *required {
                    return Err(BrokerError::HandlerRestrictionViolation {
                        topic: self.uri.to_string(),
                        required: required.to_string(),
                        actual: kind.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Remove the publication of `event_name` by `publisher` and unbind it.
    ///
    /// Returns `None` if there is no such publication.
    pub fn remove_publication(
        &self,
        publisher: ObjectKey,
        event_name: &str,
    ) -> Option<Arc<Publication>> {
        let guard = self.lock();
        let pruned = self.prune_locked();

        let current = self.publications.load_full();
        let removed = current
            .iter()
            .position(|publication| publication.same_identity(publisher, event_name))
            .map(|index| {
                let mut next = Vec::clone(&current);
                let removed = next.remove(index);
                self.publications.store(Arc::new(next));
                removed.unbind();
                removed
            });

        drop(guard);
        self.notify_pruned(&pruned);

        if let Some(publication) = &removed {
            debug!(
                topic = %self.uri,
                event_name = %event_name,
                "Removed publication"
            );
            self.context
                .extensions
                .notify(|e| e.publication_removed(self, publication));
        }
        removed
    }

    /// Add a subscription.
    ///
    /// # Errors
    ///
    /// Fails without changing the topic when the subscriber already has a
    /// subscription for the same handler, when it cannot accept some
    /// publication's payload type, or when its strategy kind violates some
    /// publication's handler restriction.
    pub fn add_subscription(&self, subscription: Arc<Subscription>) -> BrokerResult<()> {
        let guard = self.lock();
        let pruned = self.prune_locked();

        let result = self.validate_subscription(&subscription).map(|()| {
            let current = self.subscriptions.load();
            let mut next = Vec::with_capacity(current.len().saturating_add(1));
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&subscription));
            self.subscriptions.store(Arc::new(next));
        });

        drop(guard);
        self.notify_pruned(&pruned);
        result?;

        debug!(
            topic = %self.uri,
            handler = %subscription.handler_name(),
            strategy = %subscription.strategy_kind(),
            "Added subscription"
        );
        self.context
            .extensions
            .notify(|e| e.subscription_added(self, &subscription));
        Ok(())
    }

    fn validate_subscription(&self, subscription: &Subscription) -> BrokerResult<()> {
        let key = subscription.subscriber().key();
        if self
            .subscriptions
            .load()
            .iter()
            .any(|existing| existing.same_identity(key, subscription.handler_name()))
        {
            return Err(BrokerError::DuplicateSubscription {
                topic: self.uri.to_string(),
                handler: subscription.handler_name().to_string(),
            });
        }

        let expected = subscription.payload_type();
        let kind = subscription.strategy_kind();
        for publication in self.publications.load().iter() {
            if !expected.accepts(&publication.payload_type()) {
                return Err(BrokerError::IncompatiblePayload {
                    topic: self.uri.to_string(),
                    expected: expected.to_string(),
                    actual: publication.payload_type().to_string(),
                });
            }
            if let Some(required) = publication.restriction()
                && kind != *required
            {
                return Err(BrokerError::HandlerRestrictionViolation {
                    topic: self.uri.to_string(),
                    required: required.to_string(),
                    actual: kind.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Remove the subscription of `handler` by `subscriber`.
    ///
    /// Returns `None` if there is no such subscription.
    pub fn remove_subscription(
        &self,
        subscriber: ObjectKey,
        handler: &str,
    ) -> Option<Arc<Subscription>> {
        let guard = self.lock();
        let pruned = self.prune_locked();

        let current = self.subscriptions.load_full();
        let removed = current
            .iter()
            .position(|subscription| subscription.same_identity(subscriber, handler))
            .map(|index| {
                let mut next = Vec::clone(&current);
                let removed = next.remove(index);
                self.subscriptions.store(Arc::new(next));
                removed
            });

        drop(guard);
        self.notify_pruned(&pruned);

        if let Some(subscription) = &removed {
            debug!(topic = %self.uri, handler = %handler, "Removed subscription");
            self.context
                .extensions
                .notify(|e| e.subscription_removed(self, subscription));
        }
        removed
    }

    /// Relay an event raised through `publication` to every matching subscription.
    ///
    /// Subscriptions are visited in insertion order. A subscription is
    /// relayed to only when its own matchers, the publication's matchers and
    /// every global matcher all agree; all of them are evaluated.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Subscriber`] when a handler fails and no
    /// extension marks the failure handled. The remaining subscriptions are
    /// not visited.
    pub fn fire(
        &self,
        sender: &Sender,
        payload: &Payload,
        publication: &Publication,
    ) -> BrokerResult<FireSummary> {
        self.sweep();

        let extensions = &self.context.extensions;
        extensions.notify(|e| e.firing(self, publication, payload));

        let subscriptions = self.subscriptions.load_full();
        let global = self.context.global_matchers.snapshot();
        let mut summary = FireSummary::default();

        for subscription in subscriptions.iter() {
            let Some(callable) = subscription.resolve() else {
                continue;
            };

            let failed = evaluate(
                subscription
                    .matchers()
                    .iter()
                    .chain(publication.matchers())
                    .chain(global.iter()),
                publication,
                subscription,
                payload,
            );
            if !failed.is_empty() {
                trace!(
                    topic = %self.uri,
                    handler = %subscription.handler_name(),
                    failed = ?failed,
                    "Skipping subscription"
                );
                summary.skipped = summary.skipped.saturating_add(1);
                extensions.notify(|e| e.skipped(self, publication, subscription, &failed));
                continue;
            }

            extensions.notify(|e| e.relaying(self, publication, subscription));
            let invocation = Invocation::new(self.uri_arc(), sender.clone(), payload.clone());
            if let Err(error) = subscription.invoke(invocation, callable) {
                let mut context = ExceptionContext::new(
                    self.uri_arc(),
                    subscription.handler_name(),
                    subscription.subscriber().key(),
                    error,
                );
                extensions.offer_exception(&mut context);
                if !context.is_handled() {
                    return Err(BrokerError::Subscriber {
                        topic: self.uri.to_string(),
                        handler: subscription.handler_name().to_string(),
                        error: context.into_error(),
                    });
                }
            }
            summary.relayed = summary.relayed.saturating_add(1);
            extensions.notify(|e| e.relayed(self, publication, subscription));
        }

        extensions.notify(|e| e.fired(self, publication, &summary));
        Ok(summary)
    }

    /// Fire through the existing publication of `event_name` by `publisher`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownPublication`] if there is no such live
    /// publication, [`BrokerError::IncompatiblePayload`] if `payload` is not
    /// of the publication's type, and otherwise whatever [`Topic::fire`]
    /// returns.
    pub fn publish_as(
        &self,
        publisher: ObjectKey,
        event_name: &str,
        payload: Payload,
    ) -> BrokerResult<FireSummary> {
        self.sweep();

        let unknown = || BrokerError::UnknownPublication {
            topic: self.uri.to_string(),
            event_name: event_name.to_string(),
        };
        let publication = self
            .publications
            .load()
            .iter()
            .find(|publication| publication.same_identity(publisher, event_name))
            .cloned()
            .ok_or_else(unknown)?;
        let object = publication.publisher().upgrade().ok_or_else(unknown)?;

        if !publication
            .payload_type()
            .accepts(&payload.payload_type())
        {
            return Err(BrokerError::IncompatiblePayload {
                topic: self.uri.to_string(),
                expected: publication.payload_type().to_string(),
                actual: payload.payload_type().to_string(),
            });
        }

        self.fire(&Sender::new(object), &payload, &publication)
    }

    /// Prune dead publications and subscriptions. Returns how many were removed.
    ///
    /// Takes the write lock only when the current snapshots hold a dead entry.
    pub fn sweep(&self) -> usize {
        let has_dead = self.publications.load().iter().any(|p| !p.is_alive())
            || self.subscriptions.load().iter().any(|s| !s.is_alive());
        if !has_dead {
            return 0;
        }

        let guard = self.lock();
        let pruned = self.prune_locked();
        drop(guard);

        self.notify_pruned(&pruned);
        pruned
            .publications
            .len()
            .saturating_add(pruned.subscriptions.len())
    }

    /// Replace both snapshots with copies holding only live entries.
    ///
    /// Must be called with the write lock held.
    fn prune_locked(&self) -> Pruned {
        let mut pruned = Pruned::default();

        let publications = self.publications.load_full();
        if publications.iter().any(|p| !p.is_alive()) {
            let (live, dead): (Vec<_>, Vec<_>) =
                publications.iter().cloned().partition(|p| p.is_alive());
            self.publications.store(Arc::new(live));
            for publication in &dead {
                publication.unbind();
            }
            pruned.publications = dead;
        }

        let subscriptions = self.subscriptions.load_full();
        if subscriptions.iter().any(|s| !s.is_alive()) {
            let (live, dead): (Vec<_>, Vec<_>) =
                subscriptions.iter().cloned().partition(|s| s.is_alive());
            self.subscriptions.store(Arc::new(live));
            pruned.subscriptions = dead;
        }

        pruned
    }

    fn notify_pruned(&self, pruned: &Pruned) {
        if pruned.is_empty() {
            return;
        }
        debug!(
            topic = %self.uri,
            publications = pruned.publications.len(),
            subscriptions = pruned.subscriptions.len(),
            "Pruned dead entries"
        );
        let extensions = &self.context.extensions;
        for publication in &pruned.publications {
            extensions.notify(|e| e.publication_removed(self, publication));
        }
        for subscription in &pruned.subscriptions {
            extensions.notify(|e| e.subscription_removed(self, subscription));
        }
    }

    /// Unbind every publication and drop every entry.
    pub(crate) fn dispose(&self) {
        let _guard = self.lock();
        for publication in self.publications.load().iter() {
            publication.unbind();
        }
        self.publications.store(Arc::new(Vec::new()));
        self.subscriptions.store(Arc::new(Vec::new()));
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("uri", &self.uri)
            .field("publications", &self.publication_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
