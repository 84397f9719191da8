//! Post-merge validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{BackgroundSection, BrokerSection, Config, LoggingSection};

const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_broker(&config.broker)?;
    validate_background(&config.background)?;
    validate_logging(&config.logging)?;
    Ok(())
}

fn validate_broker(broker: &BrokerSection) -> ConfigResult<()> {
    if broker.default_strategy.trim().is_empty() {
        return Err(invalid(
            "broker.default_strategy",
            "must name a strategy kind",
        ));
    }
    Ok(())
}

fn validate_background(background: &BackgroundSection) -> ConfigResult<()> {
    if background.worker_threads == 0 {
        return Err(invalid(
            "background.worker_threads",
            "must be at least 1",
        ));
    }
    if background.thread_name.trim().is_empty() {
        return Err(invalid("background.thread_name", "must not be empty"));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingSection) -> ConfigResult<()> {
    let level = logging.level.to_lowercase();
    if !VALID_LEVELS.contains(&level.as_str()) {
        return Err(invalid(
            "logging.level",
            &format!(
                "invalid level '{}', expected one of: {}",
                logging.level,
                VALID_LEVELS.join(", ")
            ),
        ));
    }
    let format = logging.format.to_lowercase();
    if !VALID_FORMATS.contains(&format.as_str()) {
        return Err(invalid(
            "logging.format",
            &format!(
                "invalid format '{}', expected one of: {}",
                logging.format,
                VALID_FORMATS.join(", ")
            ),
        ));
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.to_owned(),
    }
}
