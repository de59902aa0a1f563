/*
[INPUT]:  Connection failures/successes, manual resets, clock
[OUTPUT]: Gate verdicts for socket opens and a reportable breaker snapshot
[POS]:    Session layer - circuit breaker
[UPDATE]: When changing trip thresholds, cooldown, or half-open rules
*/

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::session::config::CircuitBreakerConfig;
use crate::types::CircuitStatus;

/// Reportable breaker state.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub first_error_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Time left until a probe is allowed, when open
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    status: CircuitStatus,
    window: VecDeque<Instant>,
    consecutive: u32,
    first_error_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    next_retry_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            status: CircuitStatus::Closed,
            window: VecDeque::new(),
            consecutive: 0,
            first_error_at: None,
            last_error_at: None,
            next_retry_at: None,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == CircuitStatus::Open
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.next_retry_at
    }

    /// Record a failed connection. Returns true when this failure opened the breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        let stamp = Utc::now();
        self.first_error_at.get_or_insert(stamp);
        self.last_error_at = Some(stamp);
        self.consecutive = self.consecutive.saturating_add(1);

        self.window.push_back(now);
        while let Some(oldest) = self.window.front().copied()
            && now.saturating_duration_since(oldest) > self.config.window
        {
            self.window.pop_front();
        }

        match self.status {
            CircuitStatus::HalfOpen => {
                warn!("circuit breaker probe failed, reopening");
                self.open(now);
                true
            }
            CircuitStatus::Closed if self.window.len() >= self.config.failure_threshold as usize => {
                warn!(
                    failures = self.window.len(),
                    window_ms = self.config.window.as_millis() as u64,
                    "circuit breaker opened"
                );
                self.open(now);
                true
            }
            _ => false,
        }
    }

    /// A socket opened successfully.
    pub fn record_success(&mut self) {
        if self.status == CircuitStatus::HalfOpen {
            info!("circuit breaker probe succeeded, closing");
            self.clear();
            return;
        }
        self.consecutive = 0;
    }

    /// Open regardless of counts, e.g. when reconnection is exhausted.
    pub fn trip(&mut self, now: Instant) {
        if self.status != CircuitStatus::Open {
            warn!(cooldown_ms = self.config.cooldown.as_millis() as u64, "circuit breaker tripped");
        }
        self.open(now);
    }

    /// Gate for every socket open. When the cooldown has elapsed the breaker moves
    /// to half-open and lets exactly this attempt through.
    pub fn allow_attempt(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(remaining) = self.retry_in(now) {
            return Err(remaining);
        }
        self.cooldown_elapsed(now);
        Ok(())
    }

    /// Move open to half-open once the cooldown is over. Returns true on that transition.
    pub fn cooldown_elapsed(&mut self, now: Instant) -> bool {
        if self.status != CircuitStatus::Open || self.retry_in(now).is_some() {
            return false;
        }
        info!("circuit breaker cooldown elapsed, half-open");
        self.status = CircuitStatus::HalfOpen;
        self.next_retry_at = None;
        true
    }

    /// Remaining cooldown without changing state.
    pub fn retry_in(&self, now: Instant) -> Option<Duration> {
        match (self.status, self.next_retry_at) {
            (CircuitStatus::Open, Some(at)) if now < at => Some(at - now),
            _ => None,
        }
    }

    /// Manual operator recovery.
    pub fn reset(&mut self) {
        info!(previous = %self.status, "circuit breaker reset");
        self.clear();
    }

    pub fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        CircuitSnapshot {
            status: self.status,
            consecutive_failures: self.consecutive,
            first_error_at: self.first_error_at,
            last_error_at: self.last_error_at,
            retry_in: self.retry_in(now),
        }
    }

    fn open(&mut self, now: Instant) {
        self.status = CircuitStatus::Open;
        self.next_retry_at = Some(now + self.config.cooldown);
    }

    fn clear(&mut self) {
        self.status = CircuitStatus::Closed;
        self.window.clear();
        self.consecutive = 0;
        self.first_error_at = None;
        self.last_error_at = None;
        self.next_retry_at = None;
    }
}
