//! Switchboard Telemetry - logging setup for the Switchboard event broker.
//!
//! The broker itself only emits `tracing` events. This crate installs a
//! subscriber for them with a chosen level, format, and per-crate
//! directives. With the `config` feature, a [`LogConfig`] can be built from
//! the `[logging]` section of a Switchboard config file.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchboard_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), switchboard_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_thread_names();
//! setup_logging(&config)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
