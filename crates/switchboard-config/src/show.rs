//! Source-annotated display of a resolved configuration.

use std::fmt::Write as _;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::FieldSources;
use crate::types::Config;

/// A resolved configuration together with where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final merged configuration.
    pub config: Config,
    /// Dotted field path to the layer that set it.
    pub field_sources: FieldSources,
    /// Config file paths that were loaded, in precedence order.
    pub loaded_files: Vec<String>,
}

/// Output format for [`ResolvedConfig::show`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML with inline comments naming each value's source.
    Toml,
    /// Plain JSON.
    Json,
}

impl ResolvedConfig {
    /// Render the configuration, optionally restricted to one section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RenderError`] if serialization fails or
    /// `section` does not exist.
    pub fn show(&self, format: ShowFormat, section: Option<&str>) -> ConfigResult<String> {
        let value = self.section_value(section)?;
        match format {
            ShowFormat::Toml => self.show_toml(&value, section),
            ShowFormat::Json => serde_json::to_string_pretty(&value).map_err(render_error),
        }
    }

    fn section_value(&self, section: Option<&str>) -> ConfigResult<toml::Value> {
        let value = toml::Value::try_from(&self.config).map_err(render_error)?;
        let Some(name) = section else {
            return Ok(value);
        };
        value
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::RenderError(format!("no section named '{name}'")))
    }

    fn show_toml(&self, value: &toml::Value, section: Option<&str>) -> ConfigResult<String> {
        let body = toml::to_string_pretty(value).map_err(render_error)?;

        let mut output = String::from("# Resolved Switchboard configuration\n");
        if !self.loaded_files.is_empty() {
            output.push_str("# Loaded files:\n");
            for (i, path) in self.loaded_files.iter().enumerate() {
                let _ = writeln!(output, "#   {}. {path}", i.saturating_add(1));
            }
        }
        output.push('\n');

        let mut prefix = section.unwrap_or_default().to_owned();
        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
                prefix = header.to_owned();
            }
            match self.annotation(trimmed, &prefix) {
                Some(layer) => {
                    let _ = writeln!(output, "{line}  # [{layer}]");
                },
                None => {
                    output.push_str(line);
                    output.push('\n');
                },
            }
        }
        Ok(output)
    }

    fn annotation(&self, trimmed: &str, prefix: &str) -> Option<String> {
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('[') {
            return None;
        }
        let key = trimmed.split('=').next()?.trim();
        let path = if prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{prefix}.{key}")
        };
        self.field_sources.get(&path).map(ToString::to_string)
    }
}

fn render_error(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::RenderError(e.to_string())
}
