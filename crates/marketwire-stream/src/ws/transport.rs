/*
[INPUT]:  Stream endpoint URL and outbound frames from the session driver
[OUTPUT]: Id-tagged TransportEvent values (open/message/pong/error/closed)
[POS]:    WebSocket layer - single physical socket ownership
[UPDATE]: When changing socket lifecycle or the connector seam
*/

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use crate::http::MarketwireError;

/// Monotonically increasing identifier assigned to every socket instance.
pub type ConnectionId = u64;

/// Internal socket events, each tagged with the socket that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open { id: ConnectionId },
    Message { id: ConnectionId, text: String },
    Pong { id: ConnectionId, payload: Vec<u8> },
    Error { id: ConnectionId, message: String },
    Closed { id: ConnectionId, reason: Option<String> },
}

impl TransportEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            TransportEvent::Open { id }
            | TransportEvent::Message { id, .. }
            | TransportEvent::Pong { id, .. }
            | TransportEvent::Error { id, .. }
            | TransportEvent::Closed { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Ping(Vec<u8>),
    Close,
}

/// Sending half of one socket. Dropping it without `close` aborts the socket task.
#[derive(Debug)]
pub struct SocketLink {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    task: Option<JoinHandle<()>>,
}

impl SocketLink {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    fn send(&self, frame: OutboundFrame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Ask the socket to close and let its task drain on its own.
    fn close(mut self) {
        let _ = self.outbound.send(OutboundFrame::Close);
        self.task.take();
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Creates sockets. Implementations must emit exactly one `Closed` as the last
/// event of every socket they create.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        url: &Url,
        id: ConnectionId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SocketLink;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for TungsteniteConnector {
    fn connect(
        &self,
        url: &Url,
        id: ConnectionId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SocketLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            url.clone(),
            id,
            events,
            outbound_rx,
            self.connect_timeout,
        ));
        SocketLink::new(outbound_tx, Some(task))
    }
}

async fn run_socket(
    url: Url,
    id: ConnectionId,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    connect_timeout: Duration,
) {
    let ws_stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(err)) => {
            let _ = events.send(TransportEvent::Error {
                id,
                message: MarketwireError::from(err).to_string(),
            });
            let _ = events.send(TransportEvent::Closed {
                id,
                reason: Some("connect failed".to_string()),
            });
            return;
        }
        Err(_) => {
            let timeout = MarketwireError::Timeout {
                duration: connect_timeout.as_millis().div_ceil(1000) as u64,
            };
            let _ = events.send(TransportEvent::Error {
                id,
                message: timeout.to_string(),
            });
            let _ = events.send(TransportEvent::Closed {
                id,
                reason: Some("connect timeout".to_string()),
            });
            return;
        }
    };

    info!(connection_id = id, url = %url, "ws socket open");
    let _ = events.send(TransportEvent::Open { id });

    let (mut write, mut read) = ws_stream.split();
    let reason = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let message = match outbound {
                    Some(OutboundFrame::Text(text)) => WsMessage::Text(text.into()),
                    Some(OutboundFrame::Ping(payload)) => WsMessage::Ping(payload.into()),
                    Some(OutboundFrame::Close) | None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break Some("closed by client".to_string());
                    }
                };
                if let Err(err) = write.send(message).await {
                    let message = MarketwireError::from(err).to_string();
                    let _ = events.send(TransportEvent::Error { id, message });
                    break Some("write failed".to_string());
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = events.send(TransportEvent::Message { id, text: text.to_string() });
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message { id, text });
                        }
                        Err(_) => debug!(connection_id = id, bytes = bytes.len(), "ws binary frame dropped"),
                    },
                    Some(Ok(WsMessage::Pong(payload))) => {
                        let _ = events.send(TransportEvent::Pong { id, payload: payload.to_vec() });
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame.map(|frame| format!("{} {}", frame.code, frame.reason));
                    }
                    Some(Err(err)) => {
                        warn!(connection_id = id, error = %err, "ws read failed");
                        let message = MarketwireError::from(err).to_string();
                        let _ = events.send(TransportEvent::Error { id, message });
                        break Some("read failed".to_string());
                    }
                    None => break Some("stream ended".to_string()),
                }
            }
        }
    };

    debug!(connection_id = id, reason = ?reason, "ws socket closed");
    let _ = events.send(TransportEvent::Closed { id, reason });
}

/// Owns at most one live socket and filters events from superseded ones.
pub struct Transport {
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_id: ConnectionId,
    current: Option<ConnectionId>,
    link: Option<SocketLink>,
    open: bool,
    open_calls: u64,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            connector,
            events,
            next_id: 0,
            current: None,
            link: None,
            open: false,
            open_calls: 0,
        }
    }

    /// Discard any existing socket and begin connecting a new one.
    pub fn open(&mut self, url: &str) -> ConnectionId {
        self.close();
        self.next_id += 1;
        let id = self.next_id;
        self.current = Some(id);

        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {
                self.open_calls += 1;
                debug!(connection_id = id, url, "ws connecting");
                self.link = Some(self.connector.connect(&parsed, id, self.events.clone()));
            }
            Ok(parsed) => {
                self.fail_unsupported(id, format!("unsupported scheme `{}`", parsed.scheme()));
            }
            Err(err) => self.fail_unsupported(id, format!("invalid stream url: {err}")),
        }
        id
    }

    fn fail_unsupported(&self, id: ConnectionId, message: String) {
        warn!(connection_id = id, error = %message, "ws open rejected");
        let _ = self.events.send(TransportEvent::Error { id, message });
        let _ = self.events.send(TransportEvent::Closed {
            id,
            reason: Some("unsupported transport".to_string()),
        });
    }

    /// Transmit one frame. Dropped with a warning unless the socket is open.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        match (&self.link, self.open) {
            (Some(link), true) => link.send(frame),
            _ => {
                warn!(connection_id = ?self.current, "ws send skipped, socket not open");
                false
            }
        }
    }

    /// Idempotent. Retires the current id so the closing socket's late events are ignored.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.current = None;
        self.open = false;
    }

    /// Returns false for events from sockets that are no longer current.
    pub fn accept(&mut self, event: &TransportEvent) -> bool {
        if self.current != Some(event.id()) {
            debug!(
                connection_id = event.id(),
                current = ?self.current,
                "ws stale event ignored"
            );
            return false;
        }
        match event {
            TransportEvent::Open { .. } => self.open = true,
            TransportEvent::Closed { .. } => {
                self.open = false;
                self.current = None;
                self.link = None;
            }
            _ => {}
        }
        true
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Number of open calls that reached the connector.
    pub fn open_calls(&self) -> u64 {
        self.open_calls
    }
}
