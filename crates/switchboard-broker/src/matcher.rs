//! Predicates gating whether a fired event is relayed to a subscription.
//!
//! Matchers come from three places: the subscription, the publication and
//! the topic host (global matchers). A firing is relayed only when every one
//! of them agrees, and every matcher is evaluated even after one has
//! already failed so that the full list of failures can be reported.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{BrokerError, BrokerResult};
use crate::object::WeakObject;
use crate::payload::Payload;
use crate::publication::Publication;
use crate::subscription::Subscription;

/// A predicate over one candidate relay.
pub trait Matcher: Send + Sync {
    /// Name reported when the matcher rejects an event.
    fn name(&self) -> &str;

    /// Whether the event raised by `publication` should reach `subscription`.
    fn matches(&self, publication: &Publication, subscription: &Subscription, payload: &Payload)
    -> bool;
}

impl fmt::Debug for dyn Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Matcher").field(&self.name()).finish()
    }
}

/// Matcher built from a closure.
pub struct FnMatcher<F> {
    name: String,
    predicate: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&Publication, &Subscription, &Payload) -> bool + Send + Sync,
{
    /// Create a named closure matcher.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&Publication, &Subscription, &Payload) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(
        &self,
        publication: &Publication,
        subscription: &Subscription,
        payload: &Payload,
    ) -> bool {
        (self.predicate)(publication, subscription, payload)
    }
}

/// Matcher over the typed payload value. Payloads of another type never match.
pub struct PayloadMatcher<T, F> {
    name: String,
    predicate: F,
    _payload: PhantomData<fn(&T)>,
}

impl<T, F> PayloadMatcher<T, F>
where
    T: Any,
    F: Fn(&T) -> bool + Send + Sync,
{
    /// Create a named payload matcher.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
            _payload: PhantomData,
        }
    }
}

impl<T, F> Matcher for PayloadMatcher<T, F>
where
    T: Any,
    F: Fn(&T) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, _: &Publication, _: &Subscription, payload: &Payload) -> bool {
        payload.downcast_ref::<T>().is_some_and(&self.predicate)
    }
}

/// Only relays events raised by one specific publisher.
#[derive(Debug, Clone)]
pub struct SenderMatcher {
    publisher: WeakObject,
}

impl SenderMatcher {
    /// Match events raised by `publisher`.
    #[must_use]
    pub fn new<P: Any + Send + Sync>(publisher: &Arc<P>) -> Self {
        Self {
            publisher: WeakObject::new(publisher),
        }
    }
}

impl Matcher for SenderMatcher {
    fn name(&self) -> &str {
        "sender"
    }

    fn matches(&self, publication: &Publication, _: &Subscription, _: &Payload) -> bool {
        self.publisher.is_alive() && publication.publisher().key() == self.publisher.key()
    }
}

/// Matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Matcher for Always {
    fn name(&self) -> &str {
        "always"
    }

    fn matches(&self, _: &Publication, _: &Subscription, _: &Payload) -> bool {
        true
    }
}

/// Matches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Matcher for Never {
    fn name(&self) -> &str {
        "never"
    }

    fn matches(&self, _: &Publication, _: &Subscription, _: &Payload) -> bool {
        false
    }
}

/// A matcher given either directly or by registered name.
#[derive(Clone)]
pub enum MatcherRef {
    /// A ready matcher instance.
    Instance(Arc<dyn Matcher>),
    /// A name looked up in the [`MatcherFactory`] at registration.
    Named(String),
}

impl MatcherRef {
    /// Refer to a matcher by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wrap a matcher instance.
    #[must_use]
    pub fn instance(matcher: impl Matcher + 'static) -> Self {
        Self::Instance(Arc::new(matcher))
    }
}

impl fmt::Debug for MatcherRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(matcher) => f.debug_tuple("Instance").field(&matcher.name()).finish(),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

impl From<Arc<dyn Matcher>> for MatcherRef {
    fn from(matcher: Arc<dyn Matcher>) -> Self {
        Self::Instance(matcher)
    }
}

impl From<&str> for MatcherRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

type MatcherConstructor = Arc<dyn Fn() -> Arc<dyn Matcher> + Send + Sync>;

/// Constructors for matchers referenced by name.
///
/// `"always"` and `"never"` are registered out of the box.
#[derive(Clone)]
pub struct MatcherFactory {
    constructors: HashMap<String, MatcherConstructor>,
}

impl MatcherFactory {
    /// Create a factory holding the built-in matchers.
    #[must_use]
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };
        factory.register("always", || Arc::new(Always));
        factory.register("never", || Arc::new(Never));
        factory
    }

    /// Register a constructor, replacing any previous one for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Matcher> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Resolve one reference.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownMatcher`] for unregistered names.
    pub fn resolve(&self, matcher: &MatcherRef) -> BrokerResult<Arc<dyn Matcher>> {
        match matcher {
            MatcherRef::Instance(matcher) => Ok(Arc::clone(matcher)),
            MatcherRef::Named(name) => self
                .constructors
                .get(name)
                .map(|constructor| constructor())
                .ok_or_else(|| BrokerError::UnknownMatcher { name: name.clone() }),
        }
    }

    /// Resolve a list of references, preserving order.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown name.
    pub fn resolve_all<'a>(
        &self,
        matchers: impl IntoIterator<Item = &'a MatcherRef>,
    ) -> BrokerResult<Vec<Arc<dyn Matcher>>> {
        matchers
            .into_iter()
            .map(|matcher| self.resolve(matcher))
            .collect()
    }

    /// Whether a constructor is registered for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}

impl Default for MatcherFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MatcherFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("MatcherFactory")
            .field("names", &names)
            .finish()
    }
}

/// Copy-on-write list of matchers, read without locking.
pub struct MatcherSet {
    matchers: ArcSwap<Vec<Arc<dyn Matcher>>>,
}

impl MatcherSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            matchers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a matcher.
    pub fn add(&self, matcher: Arc<dyn Matcher>) {
        self.matchers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&matcher));
            next
        });
    }

    /// Remove every matcher called `name`. Returns whether any was removed.
    pub fn remove(&self, name: &str) -> bool {
        let previous = self.matchers.rcu(|current| {
            current
                .iter()
                .filter(|matcher| matcher.name() != name)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|matcher| matcher.name() == name)
    }

    /// Current matchers.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn Matcher>>> {
        self.matchers.load_full()
    }

    /// Number of matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.load().len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.load().is_empty()
    }
}

impl Default for MatcherSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MatcherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.matchers.load().iter()).finish()
    }
}

/// Evaluate every matcher and return the names of those that rejected.
///
/// Does not short-circuit: a matcher runs even when an earlier one failed.
pub(crate) fn evaluate<'a>(
    matchers: impl IntoIterator<Item = &'a Arc<dyn Matcher>>,
    publication: &Publication,
    subscription: &Subscription,
    payload: &Payload,
) -> Vec<String> {
    matchers
        .into_iter()
        .filter(|matcher| !matcher.matches(publication, subscription, payload))
        .map(|matcher| matcher.name().to_string())
        .collect()
}
