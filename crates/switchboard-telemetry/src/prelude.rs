//! Prelude module - commonly used types for convenient import.
//!
//! Use `use switchboard_telemetry::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchboard_telemetry::prelude::*;
//!
//! # fn main() -> TelemetryResult<()> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("switchboard_broker=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("broker logging ready");
//! # Ok(())
//! # }
//! ```

// Errors
pub use crate::{TelemetryError, TelemetryResult};

// Logging
pub use crate::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
