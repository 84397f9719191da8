//! Test harness helpers.

use std::io::Write as _;

use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

/// Set up test logging with the given filter.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging at warn level.
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// Write `content` to a temporary `.toml` file.
///
/// # Panics
///
/// Panics if the file cannot be created or written.
#[must_use]
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file.flush().expect("Failed to flush temp file");
    file
}
