//! Prelude module - commonly used types for convenient import.
//!
//! Use `use switchboard_broker::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use switchboard_broker::prelude::*;
//!
//! struct Thermometer {
//!     reading: EventSource<DataEvent<f64>>,
//! }
//!
//! impl Inspectable for Thermometer {
//!     fn inspect(this: &Arc<Self>, scan: &mut Scan) {
//!         scan.publish(PublicationDescriptor::new("sensors.temperature", &this.reading));
//!     }
//! }
//!
//! struct Display;
//!
//! impl Inspectable for Display {
//!     fn inspect(_this: &Arc<Self>, scan: &mut Scan) {
//!         scan.subscribe(SubscriptionDescriptor::new(
//!             "sensors.temperature",
//!             HandlerMethod::value("show", |_: &Display, celsius: &f64| {
//!                 println!("{celsius:.1} C");
//!                 Ok(())
//!             }),
//!         ));
//!     }
//! }
//!
//! # fn main() -> BrokerResult<()> {
//! let broker = Broker::builder()
//!     .inspector(TypeInspector::new().with::<Thermometer>().with::<Display>())
//!     .build()?;
//!
//! let thermometer = Arc::new(Thermometer { reading: EventSource::new("reading") });
//! let display = Arc::new(Display);
//! broker.register(&thermometer)?;
//! broker.register(&display)?;
//!
//! let summary = thermometer.reading.raise(DataEvent::new(21.5))?;
//! assert_eq!(summary.relayed, 1);
//! # Ok(())
//! # }
//! ```

// Errors
pub use crate::{BrokerError, BrokerResult};

// Broker assembly
pub use crate::{Broker, BrokerBuilder, Registrar, TopicHost};

// Topics and their entries
pub use crate::{FireSummary, Publication, Subscription, Topic};

// Objects, payloads and event sources
pub use crate::{DataEvent, EventSource, ObjectKey, Payload, PayloadType, Sender};

// Handlers and strategies
pub use crate::{
    DispatchLoop, Dispatcher, ExecutionStrategy, HandlerMethod, HandlerResult, StrategyKind,
    WorkerPool,
};

// Matching
pub use crate::{Matcher, MatcherRef};

// Inspection
pub use crate::{
    Inspectable, Inspector, PublicationDescriptor, Scan, SubscriptionDescriptor, TypeInspector,
};

// Extensions
pub use crate::{BrokerExtension, ExceptionContext, TracingExtension};
