/*
[INPUT]:  Message arrivals, heartbeat latencies, errors, connection lifecycle
[OUTPUT]: ConnectionMetrics snapshots with a 0-100 health score
[POS]:    Session layer - metrics aggregation
[UPDATE]: When adding metrics fields or changing the health formula
*/

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{CircuitStatus, ConnectionState};

const LATENCY_SAMPLES: usize = 10;
const STALE_AFTER: Duration = Duration::from_secs(30);
const ERROR_LOOKBACK: Duration = Duration::from_secs(60);

/// Point-in-time view of session health. Produced by the session, never mutated by consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionMetrics {
    pub state: ConnectionState,
    pub circuit: CircuitStatus,
    /// Messages per second over the rolling window
    pub message_rate: f64,
    pub messages_received: u64,
    pub last_latency: Option<Duration>,
    pub average_latency: Option<Duration>,
    pub reconnect_attempts: u32,
    pub reconnect_successes: u32,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub uptime: Duration,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub health_score: u8,
    pub active_streams: usize,
    pub fallback_streams: usize,
}

/// Inputs to the health score, split out so the formula is testable on its own.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub state: ConnectionState,
    pub circuit: CircuitStatus,
    pub average_latency: Option<Duration>,
    pub silent_for: Option<Duration>,
    pub recent_errors: usize,
}

pub fn health_score(inputs: HealthInputs) -> u8 {
    if inputs.circuit == CircuitStatus::Open {
        return 0;
    }
    let base: i32 = match inputs.state {
        ConnectionState::Connected => 100,
        ConnectionState::Connecting | ConnectionState::Reconnecting => 50,
        ConnectionState::Disconnected | ConnectionState::Disconnecting => 25,
        ConnectionState::Failed => 0,
    };

    let latency_penalty = match inputs.average_latency.map(|d| d.as_millis()) {
        Some(ms) if ms > 1000 => 30,
        Some(ms) if ms > 500 => 20,
        Some(ms) if ms > 250 => 10,
        _ => 0,
    };
    let stale_penalty = match (inputs.state, inputs.silent_for) {
        (ConnectionState::Connected, Some(silent)) if silent > STALE_AFTER => 20,
        _ => 0,
    };
    let error_penalty = (inputs.recent_errors.min(3) * 10) as i32;

    (base - latency_penalty - stale_penalty - error_penalty).clamp(0, 100) as u8
}

/// Mutable counters behind `ConnectionSession::metrics`.
#[derive(Debug)]
pub struct MetricsRecorder {
    rate_window: Duration,
    arrivals: VecDeque<Instant>,
    messages_received: u64,
    latencies: VecDeque<Duration>,
    reconnect_attempts: u32,
    reconnect_successes: u32,
    error_count: u64,
    last_error: Option<String>,
    recent_errors: VecDeque<Instant>,
    connected_since: Option<Instant>,
    last_message: Option<(Instant, DateTime<Utc>)>,
    last_heartbeat_at: Option<DateTime<Utc>>,
}

impl MetricsRecorder {
    pub fn new(rate_window: Duration) -> Self {
        Self {
            rate_window,
            arrivals: VecDeque::new(),
            messages_received: 0,
            latencies: VecDeque::with_capacity(LATENCY_SAMPLES),
            reconnect_attempts: 0,
            reconnect_successes: 0,
            error_count: 0,
            last_error: None,
            recent_errors: VecDeque::new(),
            connected_since: None,
            last_message: None,
            last_heartbeat_at: None,
        }
    }

    pub fn record_message(&mut self, now: Instant) {
        self.messages_received += 1;
        self.arrivals.push_back(now);
        self.last_message = Some((now, Utc::now()));
        self.prune(now);
    }

    pub fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        self.last_heartbeat_at = Some(Utc::now());
    }

    pub fn record_error(&mut self, message: impl Into<String>, now: Instant) {
        self.error_count += 1;
        self.last_error = Some(message.into());
        self.recent_errors.push_back(now);
        self.prune(now);
    }

    pub fn record_reconnect_attempt(&mut self) {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
    }

    /// `reconnected` marks an open that followed a failure rather than a first connect.
    pub fn record_connected(&mut self, now: Instant, reconnected: bool) {
        self.connected_since = Some(now);
        if reconnected {
            self.reconnect_successes = self.reconnect_successes.saturating_add(1);
        }
    }

    pub fn record_disconnected(&mut self) {
        self.connected_since = None;
    }

    pub fn snapshot(
        &mut self,
        now: Instant,
        state: ConnectionState,
        circuit: CircuitStatus,
        active_streams: usize,
        fallback_streams: usize,
    ) -> ConnectionMetrics {
        self.prune(now);

        let window_secs = self.rate_window.as_secs_f64();
        let message_rate = if window_secs > 0.0 {
            self.arrivals.len() as f64 / window_secs
        } else {
            0.0
        };
        let average_latency = if self.latencies.is_empty() {
            None
        } else {
            Some(self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32)
        };
        let uptime = self
            .connected_since
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
        let silent_for = match (self.connected_since, self.last_message) {
            (Some(since), Some((at, _))) => Some(now.saturating_duration_since(at.max(since))),
            (Some(since), None) => Some(now.saturating_duration_since(since)),
            (None, _) => None,
        };

        let health_score = health_score(HealthInputs {
            state,
            circuit,
            average_latency,
            silent_for,
            recent_errors: self.recent_errors.len(),
        });

        ConnectionMetrics {
            state,
            circuit,
            message_rate,
            messages_received: self.messages_received,
            last_latency: self.latencies.back().copied(),
            average_latency,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_successes: self.reconnect_successes,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            uptime,
            last_message_at: self.last_message.map(|(_, at)| at),
            last_heartbeat_at: self.last_heartbeat_at,
            health_score,
            active_streams,
            fallback_streams,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(at) = self.arrivals.front().copied()
            && now.saturating_duration_since(at) > self.rate_window
        {
            self.arrivals.pop_front();
        }
        while let Some(at) = self.recent_errors.front().copied()
            && now.saturating_duration_since(at) > ERROR_LOOKBACK
        {
            self.recent_errors.pop_front();
        }
    }
}

pub type MetricsCallback = Arc<dyn Fn(&ConnectionMetrics) + Send + Sync>;

/// Registered metrics listeners, keyed by registration id.
#[derive(Default)]
pub struct MetricsListeners {
    next_id: u64,
    listeners: BTreeMap<u64, MetricsCallback>,
}

impl MetricsListeners {
    pub fn add(&mut self, callback: MetricsCallback) -> u64 {
        self.next_id += 1;
        self.listeners.insert(self.next_id, callback);
        self.next_id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn callbacks(&self) -> Vec<MetricsCallback> {
        self.listeners.values().cloned().collect()
    }
}
