/*
[INPUT]:  Stream callbacks and periodic ConnectionMetrics snapshots
[OUTPUT]: Per-stream message tallies, health threshold crossings, summary lines
[POS]:    Reporting layer - what the monitor logs
[UPDATE]: When changing what the periodic summary shows
*/

use marketwire_stream::{ConnectionMetrics, DataSource, StreamMessage};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounts {
    pub live: u64,
    pub fallback: u64,
}

impl StreamCounts {
    pub fn total(&self) -> u64 {
        self.live + self.fallback
    }
}

/// Messages received per stream, split by origin.
#[derive(Debug, Default)]
pub struct StreamTally {
    counts: Mutex<BTreeMap<String, StreamCounts>>,
}

impl StreamTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: &StreamMessage) {
        let mut counts = lock(&self.counts);
        let entry = counts.entry(message.stream.clone()).or_default();
        match message.source {
            DataSource::Live => entry.live += 1,
            DataSource::Fallback => entry.fallback += 1,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, StreamCounts> {
        lock(&self.counts).clone()
    }

    pub fn totals(&self) -> StreamCounts {
        lock(&self.counts)
            .values()
            .fold(StreamCounts::default(), |acc, counts| StreamCounts {
                live: acc.live + counts.live,
                fallback: acc.fallback + counts.fallback,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    Degraded { score: u8 },
    Recovered { score: u8 },
}

/// Reports each crossing of the health threshold once.
#[derive(Debug)]
pub struct HealthWatch {
    threshold: u8,
    degraded: AtomicBool,
}

impl HealthWatch {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn observe(&self, metrics: &ConnectionMetrics) -> Option<HealthChange> {
        let score = metrics.health_score;
        let below = score < self.threshold;
        let was_below = self.degraded.swap(below, Ordering::SeqCst);
        match (was_below, below) {
            (false, true) => Some(HealthChange::Degraded { score }),
            (true, false) => Some(HealthChange::Recovered { score }),
            _ => None,
        }
    }
}

/// One log line describing the session and what each stream delivered.
pub fn summarize(metrics: &ConnectionMetrics, tally: &BTreeMap<String, StreamCounts>) -> String {
    let mut line = format!(
        "state={} circuit={} health={} rate={:.1}/s received={} reconnects={}/{} errors={}",
        metrics.state,
        metrics.circuit,
        metrics.health_score,
        metrics.message_rate,
        metrics.messages_received,
        metrics.reconnect_successes,
        metrics.reconnect_attempts,
        metrics.error_count,
    );
    if let Some(latency) = metrics.average_latency {
        let _ = write!(line, " latency={}ms", latency.as_millis());
    }
    if metrics.fallback_streams > 0 {
        let _ = write!(line, " polling={}", metrics.fallback_streams);
    }
    for (stream, counts) in tally {
        let _ = write!(line, " {stream}={}", counts.live);
        if counts.fallback > 0 {
            let _ = write!(line, "+{}r", counts.fallback);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketwire_stream::{CircuitStatus, ConnectionState};
    use serde_json::json;
    use std::time::Duration;

    fn metrics(health_score: u8) -> ConnectionMetrics {
        ConnectionMetrics {
            state: ConnectionState::Connected,
            circuit: CircuitStatus::Closed,
            message_rate: 12.5,
            messages_received: 125,
            last_latency: Some(Duration::from_millis(20)),
            average_latency: Some(Duration::from_millis(25)),
            reconnect_attempts: 2,
            reconnect_successes: 1,
            error_count: 3,
            last_error: None,
            uptime: Duration::from_secs(60),
            last_message_at: None,
            last_heartbeat_at: None,
            health_score,
            active_streams: 2,
            fallback_streams: 0,
        }
    }

    fn message(stream: &str, source: DataSource) -> StreamMessage {
        StreamMessage {
            stream: stream.to_string(),
            data: json!({}),
            source,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn tally_splits_live_and_fallback() {
        let tally = StreamTally::new();
        tally.record(&message("btcusdt@trade", DataSource::Live));
        tally.record(&message("btcusdt@trade", DataSource::Live));
        tally.record(&message("btcusdt@trade", DataSource::Fallback));
        tally.record(&message("ethusdt@ticker", DataSource::Fallback));

        let snapshot = tally.snapshot();
        assert_eq!(snapshot["btcusdt@trade"], StreamCounts { live: 2, fallback: 1 });
        assert_eq!(snapshot["ethusdt@ticker"].total(), 1);
        assert_eq!(tally.totals(), StreamCounts { live: 2, fallback: 2 });
    }

    #[test]
    fn health_watch_reports_crossings_once() {
        let watch = HealthWatch::new(50);
        assert_eq!(watch.observe(&metrics(90)), None);
        assert_eq!(watch.observe(&metrics(40)), Some(HealthChange::Degraded { score: 40 }));
        assert_eq!(watch.observe(&metrics(30)), None);
        assert_eq!(watch.observe(&metrics(80)), Some(HealthChange::Recovered { score: 80 }));
    }

    #[test]
    fn summary_lists_streams_and_latency() {
        let tally = StreamTally::new();
        tally.record(&message("btcusdt@trade", DataSource::Live));
        tally.record(&message("btcusdt@trade", DataSource::Fallback));

        let line = summarize(&metrics(95), &tally.snapshot());
        assert!(line.starts_with("state=connected circuit=closed health=95 rate=12.5/s"));
        assert!(line.contains("reconnects=1/2"));
        assert!(line.contains("latency=25ms"));
        assert!(line.ends_with("btcusdt@trade=1+1r"));
    }
}
