/*
[INPUT]:  Test configuration and socket/snapshot scripting needs
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for marketwire-stream tests

#![allow(dead_code)]

use async_trait::async_trait;
use marketwire_stream::ws::{ControlMessage, ControlMethod};
use marketwire_stream::{
    ConnectionId, ConnectionSession, Connector, OutboundFrame, SessionConfig, SessionEvent,
    SnapshotSource, SocketLink, StreamName, TransportEvent,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use url::Url;
use wiremock::MockServer;

pub const MOCK_STREAM_URL: &str = "wss://stream.mock.test/stream";

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// One socket created by `MockConnector`; the test plays the server side.
pub struct MockSocket {
    pub id: ConnectionId,
    pub url: Url,
    events: mpsc::UnboundedSender<TransportEvent>,
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl MockSocket {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Open { id: self.id });
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message {
            id: self.id,
            text: text.into(),
        });
    }

    pub fn push_json(&self, value: Value) {
        self.push_text(value.to_string());
    }

    pub fn pong(&self, payload: Vec<u8>) {
        let _ = self.events.send(TransportEvent::Pong {
            id: self.id,
            payload,
        });
    }

    pub fn error(&self, message: &str) {
        let _ = self.events.send(TransportEvent::Error {
            id: self.id,
            message: message.to_string(),
        });
    }

    pub fn close(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed {
            id: self.id,
            reason: Some(reason.to_string()),
        });
    }

    pub fn drain_frames(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Drains pending frames and decodes the SUBSCRIBE/UNSUBSCRIBE ones.
    pub fn control_messages(&mut self) -> Vec<ControlMessage> {
        self.drain_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
                _ => None,
            })
            .collect()
    }
}

pub fn subscribes(messages: &[ControlMessage]) -> Vec<&ControlMessage> {
    messages
        .iter()
        .filter(|message| message.method == ControlMethod::Subscribe)
        .collect()
}

pub fn unsubscribes(messages: &[ControlMessage]) -> Vec<&ControlMessage> {
    messages
        .iter()
        .filter(|message| message.method == ControlMethod::Unsubscribe)
        .collect()
}

/// Connector that records every open call and hands the sockets to the test.
#[derive(Default)]
pub struct MockConnector {
    connects: AtomicUsize,
    sockets: Mutex<VecDeque<MockSocket>>,
}

impl MockConnector {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn next_socket(&self) -> Option<MockSocket> {
        self.sockets.lock().unwrap().pop_front()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        url: &Url,
        id: ConnectionId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SocketLink {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.lock().unwrap().push_back(MockSocket {
            id,
            url: url.clone(),
            events,
            frames: rx,
        });
        SocketLink::new(tx, None)
    }
}

/// Snapshot source that counts calls per stream and echoes the stream name.
#[derive(Default)]
pub struct MockSnapshotSource {
    calls: Mutex<BTreeMap<String, usize>>,
}

impl MockSnapshotSource {
    pub fn calls(&self, stream: &str) -> usize {
        self.calls.lock().unwrap().get(stream).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch_snapshot(&self, stream: &StreamName) -> marketwire_stream::Result<Value> {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(stream.as_str().to_string()).or_insert(0);
        *count += 1;
        Ok(json!({ "snapshot": stream.as_str(), "seq": *count }))
    }
}

pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig {
        stream_url: MOCK_STREAM_URL.to_string(),
        rest_url: "http://rest.mock.test".to_string(),
        ..SessionConfig::default()
    };
    config.reconnect.initial_delay = Duration::from_millis(100);
    config.reconnect.max_delay = Duration::from_millis(400);
    // polling is opted into per test so callback counts only see live frames
    config.fallback.enabled = false;
    config
}

pub struct Harness {
    pub session: ConnectionSession,
    pub connector: Arc<MockConnector>,
    pub source: Arc<MockSnapshotSource>,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub fn harness(config: SessionConfig) -> Harness {
    let connector = Arc::new(MockConnector::default());
    let source = Arc::new(MockSnapshotSource::default());
    let session = ConnectionSession::with_components(config, connector.clone(), source.clone())
        .expect("session init");
    let events = session.subscribe_events();
    Harness {
        session,
        connector,
        source,
        events,
    }
}

/// Let the driver task process everything queued so far without moving the clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Connect and open the first socket.
pub async fn connect_and_open(harness: &Harness) -> MockSocket {
    harness.session.connect();
    settle().await;
    let socket = harness.connector.next_socket().expect("socket created");
    socket.open();
    settle().await;
    socket
}
