//! Brokers and logging assembled from configuration files.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use switchboard_broker::{Broker, BrokerBuilder, BrokerError, StrategyKind};
use switchboard_config::{Config, ConfigLayer, ShowFormat, loader};
use switchboard_telemetry::{LogConfig, LogFormat};
use switchboard_test::{Button, Listener, config_file, fixture_inspector};

#[test]
fn test_background_default_from_file() {
    let file = config_file(
        r#"
        [broker]
        default_strategy = "background"

        [background]
        worker_threads = 1
        thread_name = "sb-configured"
        "#,
    );
    let resolved = loader::load_with_env(Some(file.path()), &HashMap::new()).unwrap();

    let broker = BrokerBuilder::from_config(&resolved.config)
        .inspector(fixture_inspector())
        .build()
        .unwrap();
    assert_eq!(broker.registrar().default_strategy(), &StrategyKind::BACKGROUND);

    let button = Button::new();
    let listener = Listener::new();
    broker.register(&button).unwrap();
    broker.register(&listener).unwrap();
    button.click(5).unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || {
        listener.click_count() == 1
    }));
    assert_eq!(listener.thread_names()[0].as_deref(), Some("sb-configured"));
}

#[test]
fn test_env_fallback_reaches_broker() {
    let mut env = HashMap::new();
    env.insert(
        "SWITCHBOARD_BROKER_TRACE_EVENTS".to_owned(),
        "true".to_owned(),
    );
    let resolved = loader::load_with_env(None, &env).unwrap();
    assert!(resolved.config.broker.trace_events);
    assert_eq!(
        resolved.field_sources.get("broker.trace_events"),
        Some(&ConfigLayer::Environment)
    );

    let broker = Broker::from_config(&resolved.config).unwrap();
    assert_eq!(broker.extensions().len(), 1);
}

#[test]
fn test_unknown_configured_strategy_fails_build() {
    let config = Config::from_toml_str("[broker]\ndefault_strategy = \"marshaled\"\n").unwrap();

    let err = Broker::from_config(&config).unwrap_err();

    assert!(matches!(err, BrokerError::UnknownStrategy { ref kind } if kind == "marshaled"));
}

#[test]
fn test_logging_section_converts_to_log_config() {
    let config = Config::from_toml_str(
        r#"
        [logging]
        level = "debug"
        format = "json"
        directives = ["switchboard_broker=trace"]
        "#,
    )
    .unwrap();

    let log = LogConfig::try_from(&config.logging).unwrap();

    assert_eq!(log.level, "debug");
    assert_eq!(log.format, LogFormat::Json);
    assert!(log.build_filter().is_ok());
}

#[test]
fn test_show_annotates_file_values() {
    let file = config_file("[background]\nworker_threads = 3\n");
    let resolved = loader::load_with_env(Some(file.path()), &HashMap::new()).unwrap();

    let rendered = resolved.show(ShowFormat::Toml, Some("background")).unwrap();

    assert!(rendered.contains("worker_threads = 3  # [file "));
    assert!(rendered.contains("# [defaults]"));
}
