//! Switchboard Test - shared fixtures for the Switchboard broker.
//!
//! Provides publisher and subscriber fixtures, recording extensions, and a
//! few harness helpers. Add it as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! switchboard-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use switchboard_test::{Button, Listener, fixture_broker};
//!
//! let broker = fixture_broker();
//! let button = Button::new();
//! let listener = Listener::new();
//! broker.register(&button).unwrap();
//! broker.register(&listener).unwrap();
//! button.click(7).unwrap();
//! assert_eq!(listener.clicks(), vec![7]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
