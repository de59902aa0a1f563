/*
[INPUT]:  Subscribe/unsubscribe calls and routed stream payloads
[OUTPUT]: Per-stream callback sets and batched SUBSCRIBE/UNSUBSCRIBE messages
[POS]:    WebSocket layer - one socket to many logical streams
[UPDATE]: When changing subscription bookkeeping or batching rules
*/

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::types::{DataSource, StreamName};
use crate::ws::message::{ControlMessage, ControlMethod};

pub type SubscriptionId = u64;

/// Payload handed to stream callbacks, identical for live and fallback data.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub stream: String,
    pub data: Value,
    pub source: DataSource,
    pub received_at: DateTime<Utc>,
}

pub type StreamCallback = Arc<dyn Fn(&StreamMessage) + Send + Sync>;

struct StreamEntry {
    name: StreamName,
    base_key: String,
    callbacks: Vec<(SubscriptionId, StreamCallback)>,
}

/// Callbacks registered per stream. A stream exists here exactly while it has callbacks.
#[derive(Default)]
pub struct SubscriptionRegistry {
    streams: BTreeMap<String, StreamEntry>,
    next_id: SubscriptionId,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.streams
                    .iter()
                    .map(|(stream, entry)| (stream, entry.callbacks.len())),
            )
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new subscription id and whether this is the stream's first callback.
    pub fn register(&mut self, name: StreamName, callback: StreamCallback) -> (SubscriptionId, bool) {
        self.next_id += 1;
        let id = self.next_id;
        let key = name.as_str().to_string();
        let first = !self.streams.contains_key(&key);
        let entry = self.streams.entry(key).or_insert_with(|| StreamEntry {
            base_key: name.base_key(),
            name,
            callbacks: Vec::new(),
        });
        entry.callbacks.push((id, callback));
        (id, first)
    }

    /// Removes one callback. `Some(true)` when it was the stream's last one.
    pub fn unregister(&mut self, stream: &str, id: SubscriptionId) -> Option<bool> {
        let entry = self.streams.get_mut(stream)?;
        let before = entry.callbacks.len();
        entry.callbacks.retain(|(existing, _)| *existing != id);
        if entry.callbacks.len() == before {
            return None;
        }
        if entry.callbacks.is_empty() {
            self.streams.remove(stream);
            return Some(true);
        }
        Some(false)
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.streams.contains_key(stream)
    }

    pub fn callback_count(&self, stream: &str) -> usize {
        self.streams
            .get(stream)
            .map_or(0, |entry| entry.callbacks.len())
    }

    pub fn active_streams(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    pub fn stream_names(&self) -> Vec<StreamName> {
        self.streams.values().map(|entry| entry.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Callbacks registered under exactly `stream`.
    pub fn callbacks_for(&self, stream: &str) -> Vec<StreamCallback> {
        self.streams
            .get(stream)
            .map(|entry| entry.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Callbacks for a key derived from a raw payload: exact match, or a
    /// speed-suffixed stream whose base key equals it.
    pub fn callbacks_for_derived(&self, key: &str) -> Vec<StreamCallback> {
        self.streams
            .iter()
            .filter(|(stream, entry)| stream.as_str() == key || entry.base_key == key)
            .flat_map(|(_, entry)| entry.callbacks.iter().map(|(_, cb)| Arc::clone(cb)))
            .collect()
    }
}

/// Tracks what the current socket is subscribed to and batches pending changes.
#[derive(Debug, Default)]
pub struct Multiplexer {
    live: BTreeSet<String>,
    dirty: BTreeSet<String>,
    next_request_id: u64,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, stream: impl Into<String>) {
        self.dirty.insert(stream.into());
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Fresh socket: subscribe to the full wanted set in one message.
    pub fn on_open(&mut self, wanted: Vec<String>) -> Option<ControlMessage> {
        self.dirty.clear();
        self.live = wanted.iter().cloned().collect();
        if wanted.is_empty() {
            return None;
        }
        Some(self.control(ControlMethod::Subscribe, wanted))
    }

    pub fn on_close(&mut self) {
        self.live.clear();
        self.dirty.clear();
    }

    /// Reconcile pending changes against the registry; a remove followed by a
    /// re-add of the same stream produces no traffic.
    pub fn flush(&mut self, registry: &SubscriptionRegistry) -> Vec<ControlMessage> {
        let mut subscribe = Vec::new();
        let mut unsubscribe = Vec::new();

        for stream in std::mem::take(&mut self.dirty) {
            let wanted = registry.contains(&stream);
            let live = self.live.contains(&stream);
            if wanted && !live {
                self.live.insert(stream.clone());
                subscribe.push(stream);
            } else if !wanted && live {
                self.live.remove(&stream);
                unsubscribe.push(stream);
            }
        }

        let mut messages = Vec::new();
        if !subscribe.is_empty() {
            messages.push(self.control(ControlMethod::Subscribe, subscribe));
        }
        if !unsubscribe.is_empty() {
            messages.push(self.control(ControlMethod::Unsubscribe, unsubscribe));
        }
        messages
    }

    fn control(&mut self, method: ControlMethod, params: Vec<String>) -> ControlMessage {
        self.next_request_id += 1;
        ControlMessage {
            method,
            params,
            id: self.next_request_id,
        }
    }
}
