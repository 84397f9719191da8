//! Layered configuration loading.
//!
//! 1. Parse the embedded `defaults.toml`.
//! 2. Merge the config file, if one was given and exists.
//! 3. Fill fields the file left unset from `SWITCHBOARD_*` variables.
//! 4. Deserialize into [`Config`] and validate.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Load configuration using the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable or malformed, an
/// environment value cannot be coerced, or validation fails.
pub fn load(path: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(path, &collect_env_vars())
}

/// Load configuration with an explicit environment map.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    path: Option<&Path>,
    env: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged = parse_defaults()?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    if let Some(path) = path
        && let Some(overlay) = try_load_file(path)?
    {
        let file_display = path.display().to_string();
        deep_merge_tracking(
            &mut merged,
            &overlay,
            &ConfigLayer::File(file_display.clone()),
            &mut field_sources,
        );
        info!(path = %file_display, "loaded config file");
        loaded_files.push(file_display);
    }

    apply_env_fallbacks(&mut merged, &mut field_sources, env)?;

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;
    debug!(?config, "resolved configuration");

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Parse a configuration from a TOML string layered over the defaults.
///
/// No environment fallbacks are applied.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the text is malformed or fails validation.
pub fn from_toml_str(text: &str) -> ConfigResult<Config> {
    let mut merged = parse_defaults()?;
    let overlay: toml::Value = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: "<string>".to_owned(),
        source: e,
    })?;
    crate::merge::deep_merge(&mut merged, &overlay);
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<string>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;
    Ok(config)
}

fn parse_defaults() -> ConfigResult<toml::Value> {
    toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })
}

/// Read and parse `path`, or `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                metadata.len()
            ),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    let value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}
