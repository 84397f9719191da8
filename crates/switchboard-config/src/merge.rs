//! Layered configuration merging with source tracking.

use std::collections::HashMap;
use std::fmt;

/// Where a configuration field's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Embedded `defaults.toml`.
    Defaults,
    /// A config file at the given path.
    File(String),
    /// A `SWITCHBOARD_*` environment variable.
    Environment,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => f.write_str("defaults"),
            Self::File(path) => write!(f, "file {path}"),
            Self::Environment => f.write_str("environment"),
        }
    }
}

/// Dotted field path to the layer that last set it.
pub type FieldSources = HashMap<String, ConfigLayer>;

/// Recursively deep-merge `overlay` into `base`.
///
/// - Tables merge recursively per-field.
/// - Scalars and arrays from the overlay **replace** the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Deep-merge `overlay` into `base`, recording `layer` for every leaf the
/// overlay sets.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    layer: &ConfigLayer,
    sources: &mut FieldSources,
) {
    deep_merge(base, overlay);
    record_leaves(overlay, "", layer, sources);
}

/// Record `layer` for every leaf path of `val`.
pub fn record_leaves(
    val: &toml::Value,
    prefix: &str,
    layer: &ConfigLayer,
    sources: &mut FieldSources,
) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            record_leaves(child, &path, layer, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), layer.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_tables_merge_and_scalars_replace() {
        let mut base = parse(
            r#"
            [broker]
            default_strategy = "synchronous"
            trace_events = false
            [logging]
            directives = ["a=debug"]
            "#,
        );
        let overlay = parse(
            r#"
            [broker]
            trace_events = true
            [logging]
            directives = ["b=trace"]
            "#,
        );

        deep_merge(&mut base, &overlay);

        assert_eq!(base["broker"]["default_strategy"].as_str(), Some("synchronous"));
        assert_eq!(base["broker"]["trace_events"].as_bool(), Some(true));
        let directives = base["logging"]["directives"].as_array().unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].as_str(), Some("b=trace"));
    }

    #[test]
    fn test_tracking_records_only_overlay_leaves() {
        let mut base = parse("[background]\nworker_threads = 2\nthread_name = \"w\"");
        let overlay = parse("[background]\nworker_threads = 8");
        let mut sources = FieldSources::new();
        let layer = ConfigLayer::File("switchboard.toml".to_owned());

        deep_merge_tracking(&mut base, &overlay, &layer, &mut sources);

        assert_eq!(sources.get("background.worker_threads"), Some(&layer));
        assert!(!sources.contains_key("background.thread_name"));
    }
}
