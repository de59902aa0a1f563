/*
[INPUT]:  YAML snippets and synthetic environment maps
[OUTPUT]: Test results for layered monitor configuration
[POS]:    Integration tests - configuration loading
[UPDATE]: When configuration keys or defaults change
*/

use marketwire_monitor::MonitorConfig;
use marketwire_stream::SessionConfig;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio_test::assert_ok;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn write_temp_yaml(name: &str, content: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("marketwire-monitor-{}-{name}.yaml", std::process::id()));
    let mut file = std::fs::File::create(&path).expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    path
}

#[test]
fn test_defaults_match_session_defaults() {
    let config = MonitorConfig::default();
    assert_ok!(config.validate());

    let session = config.to_session_config();
    assert_eq!(session, SessionConfig::default());
}

#[test]
fn test_yaml_overrides_only_named_keys() {
    let yaml = r#"
streams:
  - ethusdt@depth5@100ms
  - ethusdt@kline_1m
reconnect:
  max_attempts: 4
  initial_delay_ms: 500
heartbeat:
  timeout_ms: 3000
fallback:
  enabled: false
"#;
    let config = assert_ok!(MonitorConfig::from_yaml_str(yaml));
    assert_eq!(config.streams, vec!["ethusdt@depth5@100ms", "ethusdt@kline_1m"]);

    let session = config.to_session_config();
    assert_eq!(session.reconnect.max_attempts, 4);
    assert_eq!(session.reconnect.initial_delay, Duration::from_millis(500));
    assert_eq!(session.reconnect.max_delay, Duration::from_secs(30));
    assert_eq!(session.heartbeat.timeout, Duration::from_secs(3));
    assert_eq!(session.heartbeat.interval, Duration::from_secs(30));
    assert!(!session.fallback.enabled);
}

#[test]
fn test_invalid_session_values_rejected() {
    let yaml = r#"
reconnect:
  initial_delay_ms: 5000
  max_delay_ms: 1000
"#;
    assert!(MonitorConfig::from_yaml_str(yaml).is_err());
    assert!(MonitorConfig::from_yaml_str("streams: []").is_err());
}

#[test]
fn test_environment_overrides_file() {
    let path = write_temp_yaml(
        "env",
        "stream_url: wss://stream.example.test/stream\ncircuit_breaker:\n  failure_threshold: 8\n",
    );
    let vars = env(&[
        ("MARKETWIRE_CIRCUIT_BREAKER__FAILURE_THRESHOLD", "3"),
        ("MARKETWIRE_STREAMS", "btcusdt@trade,solusdt@miniTicker"),
        ("MARKETWIRE_LOG__LEVEL", "debug"),
        ("UNRELATED_VAR", "ignored"),
    ]);

    let config = assert_ok!(MonitorConfig::load_with_env(Some(&path), Some(vars)));
    let _ = std::fs::remove_file(&path);

    assert_eq!(config.stream_url, "wss://stream.example.test/stream");
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.streams, vec!["btcusdt@trade", "solusdt@miniTicker"]);
    assert_eq!(config.log.level, "debug");
}

#[test]
fn test_missing_file_is_an_error() {
    let path = std::env::temp_dir().join("marketwire-monitor-does-not-exist.yaml");
    assert!(MonitorConfig::load_with_env(Some(&path), Some(HashMap::new())).is_err());
}

#[test]
fn test_yaml_dump_reloads_identically() {
    let mut config = MonitorConfig::default();
    config.streams = vec!["bnbusdt@aggTrade".to_string()];
    config.log.dir = Some("/var/log/marketwire".to_string());

    let yaml = assert_ok!(config.to_yaml());
    let reloaded = assert_ok!(MonitorConfig::from_yaml_str(&yaml));
    assert_eq!(reloaded, config);
}
