//! Configuration struct definitions.
//!
//! Every section derives `Default` with the same values as the embedded
//! `defaults.toml`, so a partially written file deserializes cleanly.

use serde::{Deserialize, Serialize};

/// Top-level broker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker assembly settings.
    pub broker: BrokerSection,
    /// Worker pool for the background strategy.
    pub background: BackgroundSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// BrokerSection
// ---------------------------------------------------------------------------

/// Broker assembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Strategy kind used by subscriptions that name none (`"synchronous"`,
    /// `"background"`, `"marshaled"` or a custom kind).
    pub default_strategy: String,
    /// Whether to install the tracing extension that logs every broker
    /// notification.
    pub trace_events: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            default_strategy: "synchronous".to_owned(),
            trace_events: false,
        }
    }
}

// ---------------------------------------------------------------------------
// BackgroundSection
// ---------------------------------------------------------------------------

/// Worker pool for the background strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSection {
    /// Number of worker threads. Must be at least 1.
    pub worker_threads: usize,
    /// Name given to worker threads.
    pub thread_name: String,
}

impl Default for BackgroundSection {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "switchboard-worker".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"` or `"json"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["switchboard_broker=trace"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
