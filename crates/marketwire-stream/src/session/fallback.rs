/*
[INPUT]:  Degraded/healthy verdicts and the active stream set from the driver
[OUTPUT]: Periodic REST snapshots delivered through the stream callbacks
[POS]:    Session layer - REST fallback polling
[UPDATE]: When changing poll scheduling or snapshot sources
*/

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::http::Result;
use crate::types::StreamName;

/// REST equivalent of a stream, returning a payload shaped like the stream's events.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, stream: &StreamName) -> Result<Value>;
}

/// Receives each successful snapshot.
pub type SnapshotSink = Arc<dyn Fn(&StreamName, Value) + Send + Sync>;

/// One stream's poll task. Dropping the timer aborts the task.
struct PollTimer {
    task: JoinHandle<()>,
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct FallbackPoller {
    source: Arc<dyn SnapshotSource>,
    sink: SnapshotSink,
    interval: Duration,
    timers: BTreeMap<String, PollTimer>,
}

impl FallbackPoller {
    pub fn new(source: Arc<dyn SnapshotSource>, sink: SnapshotSink, interval: Duration) -> Self {
        Self {
            source,
            sink,
            interval,
            timers: BTreeMap::new(),
        }
    }

    /// Poll exactly `streams` when `active`, nothing otherwise.
    pub fn sync(&mut self, active: bool, streams: &[StreamName]) {
        if !active {
            self.stop_all();
            return;
        }

        let wanted: BTreeMap<&str, &StreamName> = streams
            .iter()
            .map(|stream| (stream.as_str(), stream))
            .collect();
        self.timers.retain(|stream, _| {
            let keep = wanted.contains_key(stream.as_str());
            if !keep {
                debug!(stream = %stream, "fallback poll stopped");
            }
            keep
        });
        for (key, stream) in wanted {
            if !self.timers.contains_key(key) {
                self.start(stream.clone());
            }
        }
    }

    fn start(&mut self, stream: StreamName) {
        info!(stream = %stream, interval_ms = self.interval.as_millis() as u64, "fallback poll started");
        let key = stream.as_str().to_string();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            self.interval,
            stream,
        ));
        self.timers.insert(key, PollTimer { task });
    }

    pub fn stop_all(&mut self) {
        if !self.timers.is_empty() {
            info!(streams = self.timers.len(), "fallback polling stopped");
        }
        self.timers.clear();
    }

    pub fn polling_streams(&self) -> Vec<String> {
        self.timers.keys().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

async fn poll_loop(
    source: Arc<dyn SnapshotSource>,
    sink: SnapshotSink,
    interval: Duration,
    stream: StreamName,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match source.fetch_snapshot(&stream).await {
            Ok(payload) => sink(&stream, payload),
            Err(err) => {
                warn!(stream = %stream, error = %err, retryable = err.is_retryable(), "fallback poll failed");
            }
        }
    }
}
