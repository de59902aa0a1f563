/*
[INPUT]:  Optional YAML file, MARKETWIRE_* environment variables, built-in defaults
[OUTPUT]: Validated monitor configuration and the SessionConfig derived from it
[POS]:    Configuration layer - monitor setup
[UPDATE]: When adding new configuration options
*/

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use marketwire_stream::{
    CircuitBreakerConfig, FallbackConfig, HeartbeatConfig, ReconnectConfig, SessionConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "MARKETWIRE";

/// Top-level configuration for the monitor
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Combined-stream WebSocket endpoint
    pub stream_url: String,
    /// REST base URL used by fallback polling
    pub rest_url: String,
    /// Streams to watch, e.g. "btcusdt@trade"
    pub streams: Vec<String>,
    pub connect_timeout_ms: u64,
    pub force_reconnect_settle_ms: u64,
    pub metrics_interval_ms: u64,
    /// Period of the summary log line
    pub report_interval_ms: u64,
    /// Health score under which the monitor logs a warning
    pub health_warn_below: u8,
    pub reconnect: ReconnectSection,
    pub heartbeat: HeartbeatSection,
    pub circuit_breaker: CircuitBreakerSection,
    pub fallback: FallbackSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub max_attempts: u32,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub window_ms: u64,
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackSection {
    pub enabled: bool,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSection {
    /// EnvFilter directive, e.g. "info" or "marketwire_stream=debug"
    pub level: String,
    /// Directory for daily rolling log files; stdout only when unset
    pub dir: Option<String>,
    pub file_prefix: String,
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            stream_url: session.stream_url,
            rest_url: session.rest_url,
            streams: vec!["btcusdt@trade".to_string(), "btcusdt@bookTicker".to_string()],
            connect_timeout_ms: millis(session.connect_timeout),
            force_reconnect_settle_ms: millis(session.force_reconnect_settle),
            metrics_interval_ms: millis(session.metrics_interval),
            report_interval_ms: 10_000,
            health_warn_below: 50,
            reconnect: ReconnectSection::default(),
            heartbeat: HeartbeatSection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            fallback: FallbackSection::default(),
            log: LogSection::default(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            initial_delay_ms: millis(defaults.initial_delay),
            max_delay_ms: millis(defaults.max_delay),
            factor: defaults.factor,
            max_attempts: defaults.max_attempts,
            jitter_min: defaults.jitter_min,
            jitter_max: defaults.jitter_max,
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        let defaults = HeartbeatConfig::default();
        Self {
            interval_ms: millis(defaults.interval),
            timeout_ms: millis(defaults.timeout),
        }
    }
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            window_ms: millis(defaults.window),
            cooldown_ms: millis(defaults.cooldown),
        }
    }
}

impl Default for FallbackSection {
    fn default() -> Self {
        let defaults = FallbackConfig::default();
        Self {
            enabled: defaults.enabled,
            poll_interval_ms: millis(defaults.poll_interval),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_prefix: "marketwire-monitor.log".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load defaults, then the YAML file at `path` if given, then MARKETWIRE_* variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like `load`, with an explicit variable map instead of the process environment.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }
        let config: Self = builder
            .add_source(environment(env))
            .build()
            .context("assemble configuration sources")?
            .try_deserialize()
            .context("decode monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document over the defaults, without consulting the environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .context("parse yaml configuration")?
            .try_deserialize()
            .context("decode monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serialize monitor configuration")
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.streams.is_empty(), "at least one stream is required");
        anyhow::ensure!(self.report_interval_ms > 0, "report_interval_ms must be > 0");
        self.to_session_config()
            .validate()
            .context("invalid session settings")?;
        Ok(())
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            stream_url: self.stream_url.clone(),
            rest_url: self.rest_url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            force_reconnect_settle: Duration::from_millis(self.force_reconnect_settle_ms),
            metrics_interval: Duration::from_millis(self.metrics_interval_ms),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                factor: self.reconnect.factor,
                max_attempts: self.reconnect.max_attempts,
                jitter_min: self.reconnect.jitter_min,
                jitter_max: self.reconnect.jitter_max,
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(self.heartbeat.interval_ms),
                timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                window: Duration::from_millis(self.circuit_breaker.window_ms),
                cooldown: Duration::from_millis(self.circuit_breaker.cooldown_ms),
            },
            fallback: FallbackConfig {
                enabled: self.fallback.enabled,
                poll_interval: Duration::from_millis(self.fallback.poll_interval_ms),
            },
            ..SessionConfig::default()
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

/// `MARKETWIRE_STREAM_URL`, `MARKETWIRE_RECONNECT__MAX_ATTEMPTS`, `MARKETWIRE_STREAMS=a,b`
fn environment(source: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("streams")
        .source(source)
}
