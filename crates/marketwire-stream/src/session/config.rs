/*
[INPUT]:  Caller-supplied tuning values (or defaults)
[OUTPUT]: Validated SessionConfig consumed by the session driver
[POS]:    Session layer - configuration
[UPDATE]: When adding new tuning options
*/

use std::time::Duration;
use url::Url;

use crate::http::{DEFAULT_REST_URL, MarketwireError, Result};

/// Combined-stream endpoint of the exchange
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/stream";

/// Upper bound accepted for `ReconnectConfig::jitter_max`
pub const MAX_JITTER: f64 = 2.0;

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            max_attempts: 10,
            jitter_min: 0.75,
            jitter_max: 1.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Period between liveness probes
    pub interval: Duration,
    /// Max wait for a probe acknowledgement
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures inside `window` that open the breaker
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Everything a ConnectionSession needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub stream_url: String,
    pub rest_url: String,
    pub connect_timeout: Duration,
    /// Pause between closing the old socket and opening the new one on a forced reconnect
    pub force_reconnect_settle: Duration,
    pub metrics_interval: Duration,
    /// Rolling window for the message rate
    pub message_rate_window: Duration,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub fallback: FallbackConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            force_reconnect_settle: Duration::from_millis(250),
            metrics_interval: Duration::from_secs(1),
            message_rate_window: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        let reconnect = &self.reconnect;
        ensure(!reconnect.initial_delay.is_zero(), "reconnect.initial_delay must be > 0")?;
        ensure(
            reconnect.max_delay >= reconnect.initial_delay,
            "reconnect.max_delay must be >= reconnect.initial_delay",
        )?;
        ensure(
            reconnect.factor.is_finite() && reconnect.factor >= 1.0,
            "reconnect.factor must be >= 1",
        )?;
        ensure(reconnect.max_attempts >= 1, "reconnect.max_attempts must be >= 1")?;
        ensure(
            reconnect.jitter_min > 0.0 && reconnect.jitter_min <= reconnect.jitter_max,
            "reconnect jitter bounds must satisfy 0 < min <= max",
        )?;
        ensure(
            reconnect.jitter_max.is_finite() && reconnect.jitter_max <= MAX_JITTER,
            "reconnect.jitter_max must be <= 2",
        )?;

        ensure(!self.heartbeat.interval.is_zero(), "heartbeat.interval must be > 0")?;
        ensure(!self.heartbeat.timeout.is_zero(), "heartbeat.timeout must be > 0")?;

        let breaker = &self.circuit_breaker;
        ensure(
            breaker.failure_threshold >= 1,
            "circuit_breaker.failure_threshold must be >= 1",
        )?;
        ensure(!breaker.window.is_zero(), "circuit_breaker.window must be > 0")?;
        ensure(!breaker.cooldown.is_zero(), "circuit_breaker.cooldown must be > 0")?;

        ensure(!self.fallback.poll_interval.is_zero(), "fallback.poll_interval must be > 0")?;
        ensure(!self.metrics_interval.is_zero(), "metrics_interval must be > 0")?;
        ensure(!self.message_rate_window.is_zero(), "message_rate_window must be > 0")?;
        ensure(!self.connect_timeout.is_zero(), "connect_timeout must be > 0")?;
        ensure(!self.stream_url.trim().is_empty(), "stream_url must not be empty")?;

        Url::parse(&self.rest_url)
            .map_err(|err| MarketwireError::Config(format!("rest_url is invalid: {err}")))?;
        Ok(())
    }
}

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(MarketwireError::Config(message.to_string()))
    }
}
