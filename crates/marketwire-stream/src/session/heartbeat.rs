/*
[INPUT]:  Connected/disconnected transitions, pong frames, clock
[OUTPUT]: Probe payloads to send, round-trip latencies, timeout verdicts
[POS]:    Session layer - liveness detection
[UPDATE]: When changing probe scheduling or acknowledgement matching
*/

use std::time::Duration;
use tokio::time::Instant;

use crate::session::config::HeartbeatConfig;

#[derive(Debug, Clone, Copy)]
struct Probe {
    seq: u64,
    sent_at: Instant,
    deadline: Instant,
}

/// What the driver should do when the heartbeat deadline fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    Probe(Vec<u8>),
    TimedOut { waited: Duration },
    Idle,
}

/// Timer bookkeeping only; the driver owns the socket and the clock.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    next_probe_at: Option<Instant>,
    outstanding: Option<Probe>,
    seq: u64,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            next_probe_at: None,
            outstanding: None,
            seq: 0,
        }
    }

    /// Arm the probe timer for a freshly opened socket.
    pub fn start(&mut self, now: Instant) {
        self.outstanding = None;
        self.next_probe_at = Some(now + self.config.interval);
    }

    pub fn stop(&mut self) {
        self.next_probe_at = None;
        self.outstanding = None;
    }

    /// Earliest instant at which `poll` has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_probe_at, self.outstanding.map(|probe| probe.deadline)) {
            (Some(probe), Some(deadline)) => Some(probe.min(deadline)),
            (probe, deadline) => probe.or(deadline),
        }
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(probe) = self.outstanding
            && now >= probe.deadline
        {
            self.stop();
            return HeartbeatAction::TimedOut {
                waited: now.saturating_duration_since(probe.sent_at),
            };
        }

        match self.next_probe_at {
            Some(at) if now >= at => {
                self.next_probe_at = Some(now + self.config.interval);
                if self.outstanding.is_some() {
                    return HeartbeatAction::Idle;
                }
                self.seq += 1;
                self.outstanding = Some(Probe {
                    seq: self.seq,
                    sent_at: now,
                    deadline: now + self.config.timeout,
                });
                HeartbeatAction::Probe(self.seq.to_be_bytes().to_vec())
            }
            _ => HeartbeatAction::Idle,
        }
    }

    /// Match a pong against the outstanding probe. Empty payloads are accepted
    /// since some servers do not echo the ping body.
    pub fn acknowledge(&mut self, payload: &[u8], now: Instant) -> Option<Duration> {
        let probe = self.outstanding?;
        if !payload.is_empty() && payload != probe.seq.to_be_bytes().as_slice() {
            return None;
        }
        self.outstanding = None;
        Some(now.saturating_duration_since(probe.sent_at))
    }
}
