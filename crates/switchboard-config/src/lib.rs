#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for the Switchboard event broker.
//!
//! A single [`Config`] drives broker assembly (default strategy, event
//! tracing), the background worker pool, and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use switchboard_config::Config;
//!
//! let resolved = Config::load(Some(std::path::Path::new("switchboard.toml"))).unwrap();
//! println!("default strategy: {}", resolved.config.broker.default_strategy);
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Config file** passed to [`Config::load`]
//! 2. **Environment variables** (`SWITCHBOARD_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate does not depend on the broker. The broker's `config` feature
//! consumes [`Config`] at assembly time.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Layered configuration merging with source tracking.
pub mod merge;
/// Resolved configuration display.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use merge::{ConfigLayer, FieldSources};
pub use show::{ResolvedConfig, ShowFormat};
pub use types::*;

impl Config {
    /// Load configuration from defaults, an optional file, and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed or the final
    /// configuration fails validation.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(path)
    }

    /// Parse configuration text layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the text is malformed or invalid.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        loader::from_toml_str(text)
    }
}
