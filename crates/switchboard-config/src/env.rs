//! Environment variable fallbacks.
//!
//! A `SWITCHBOARD_*` variable only fills a field that no config file set.
//! Values are coerced to the TOML type already present at the target path.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// Environment variable to dotted field path.
pub const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("SWITCHBOARD_BROKER_DEFAULT_STRATEGY", "broker.default_strategy"),
    ("SWITCHBOARD_BROKER_TRACE_EVENTS", "broker.trace_events"),
    ("SWITCHBOARD_BACKGROUND_WORKER_THREADS", "background.worker_threads"),
    ("SWITCHBOARD_BACKGROUND_THREAD_NAME", "background.thread_name"),
    ("SWITCHBOARD_LOG_LEVEL", "logging.level"),
    ("SWITCHBOARD_LOG_FORMAT", "logging.format"),
];

/// Collect the mapped variables present in the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    ENV_MAPPINGS
        .iter()
        .filter_map(|(var, _)| std::env::var(var).ok().map(|v| ((*var).to_owned(), v)))
        .collect()
}

/// Apply environment fallbacks from `env` onto `merged`.
///
/// Fields recorded in `sources` as coming from a file are left untouched.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a value cannot be coerced to the
/// field's type.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env: &HashMap<String, String>,
) -> ConfigResult<()> {
    for (var, path) in ENV_MAPPINGS {
        let Some(raw) = env.get(*var) else {
            continue;
        };
        if matches!(sources.get(*path), Some(ConfigLayer::File(_))) {
            tracing::debug!(var, path, "config file value takes precedence over env var");
            continue;
        }
        set_field_from_string(merged, path, raw).map_err(|message| ConfigError::EnvError {
            var_name: (*var).to_owned(),
            message,
        })?;
        sources.insert((*path).to_owned(), ConfigLayer::Environment);
    }
    Ok(())
}

/// Set a dotted `path` in `root` to `raw`, coerced to the existing type.
fn set_field_from_string(root: &mut toml::Value, path: &str, raw: &str) -> Result<(), String> {
    let mut segments = path.split('.').peekable();
    let mut cursor = root;
    while let Some(segment) = segments.next() {
        let table = cursor
            .as_table_mut()
            .ok_or_else(|| format!("'{path}' does not name a table field"))?;
        if segments.peek().is_none() {
            let value = coerce_to_toml_value(table.get(segment), raw)?;
            table.insert(segment.to_owned(), value);
            return Ok(());
        }
        cursor = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    }
    Err(format!("empty field path '{path}'"))
}

/// Coerce `raw` to the same TOML type as `existing`. Unknown fields become
/// strings.
fn coerce_to_toml_value(existing: Option<&toml::Value>, raw: &str) -> Result<toml::Value, String> {
    match existing {
        Some(toml::Value::Boolean(_)) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(format!("expected a boolean, got '{raw}'")),
        },
        Some(toml::Value::Integer(_)) => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| format!("expected an integer, got '{raw}': {e}")),
        Some(toml::Value::Float(_)) => raw
            .trim()
            .parse::<f64>()
            .map(toml::Value::Float)
            .map_err(|e| format!("expected a number, got '{raw}': {e}")),
        Some(toml::Value::Array(_)) => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}
