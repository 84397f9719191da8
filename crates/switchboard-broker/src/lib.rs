//! Switchboard Broker - in-process publish/subscribe mediator.
//!
//! This crate provides:
//! - Topics holding the live publications and subscriptions for one URI
//! - A topic host that creates topics on first use
//! - A registrar for adding and removing publications and subscriptions,
//!   either imperatively or by inspecting whole objects
//! - Pluggable execution strategies deciding where a handler runs
//! - An extension host that observes every lifecycle and firing event
//!
//! # Architecture
//!
//! Publishers expose [`EventSource`] fields. Registering a publisher binds
//! each source to a [`Topic`]; raising the source fires the topic, which
//! matches the event against every live [`Subscription`] and relays it
//! through the subscription's [`ExecutionStrategy`].
//!
//! The broker never keeps a publisher or subscriber alive. Both are held
//! weakly and entries whose owner has been dropped are swept lazily at the
//! start of the next mutation or firing on the same topic.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use switchboard_broker::{Broker, EventSource, HandlerMethod, StrategyKind};
//!
//! struct Button {
//!     clicked: EventSource<u32>,
//! }
//!
//! struct Counter {
//!     hits: AtomicUsize,
//! }
//!
//! # fn main() -> Result<(), switchboard_broker::BrokerError> {
//! let broker = Broker::new();
//! let button = Arc::new(Button { clicked: EventSource::new("clicked") });
//! let counter = Arc::new(Counter { hits: AtomicUsize::new(0) });
//!
//! broker.registrar().add_publication("ui.button", &button, &button.clicked, None, [])?;
//! broker.registrar().add_subscription(
//!     "ui.button",
//!     &counter,
//!     HandlerMethod::payload("on_click", |counter: &Counter, _x: &u32| {
//!         counter.hits.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     }),
//!     &StrategyKind::SYNCHRONOUS,
//!     [],
//! )?;
//!
//! button.clicked.raise(10)?;
//! assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod matcher;
pub mod strategy;

mod broker;
mod error;
mod extension;
mod handler;
mod host;
mod inspector;
mod object;
mod payload;
mod publication;
mod registrar;
mod source;
mod subscription;
mod topic;

pub use broker::{Broker, BrokerBuilder};
pub use error::{BrokerError, BrokerResult};
pub use extension::{
    BrokerExtension, ExceptionContext, ExtensionHost, RegisteredItem, TracingExtension,
};
pub use handler::{
    BoundCallable, HandlerArgs, HandlerMethod, HandlerResult, HandlerShape, Param, Receiver,
    ResolvedCallable,
};
pub use host::TopicHost;
pub use inspector::{
    Inspectable, Inspector, PublicationDescriptor, Scan, SelfRegistration,
    SubscriptionDescriptor, TypeInspector,
};
pub use matcher::{Matcher, MatcherFactory, MatcherRef, MatcherSet};
pub use object::{ObjectKey, ObjectRef, Sender, WeakObject};
pub use payload::{DataEvent, Payload, PayloadType};
pub use publication::Publication;
pub use registrar::Registrar;
pub use source::{EventSource, SourceHandle};
pub use strategy::{
    Background, Dispatcher, DispatchLoop, ExecutionStrategy, Invocation, Marshaled,
    StrategyContext, StrategyFactory, StrategyKind, Synchronous, WorkerPool,
};
pub use subscription::Subscription;
pub use topic::{FireSummary, Topic};
