/*
[INPUT]:  Facade commands, transport events, timer deadlines, cancellation
[OUTPUT]: Connection state transitions, control frames, callbacks, events
[POS]:    Session layer - single task owning socket, timers and polling
[UPDATE]: When changing reconnection, heartbeat or fallback orchestration
*/

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::config::SessionConfig;
use crate::session::event::{ErrorKind, SessionEvent};
use crate::session::fallback::{FallbackPoller, SnapshotSink, SnapshotSource};
use crate::session::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::session::reconnect::ReconnectPolicy;
use crate::session::{Shared, lock, notify_metrics_listeners};
use crate::types::{ConnectionState, DataSource};
use crate::ws::message::{log_control_sent, log_parse_fail_once, log_unroutable_once};
use crate::ws::{
    ConnectionId, Connector, ControlMessage, InboundFrame, Multiplexer, OutboundFrame, Transport,
    TransportEvent, parse_frame,
};

/// Requests from the facade to the driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    ForceReconnect,
    ResetCircuit,
    StreamAdded(String),
    StreamRemoved(String),
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    transport: Transport,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    multiplexer: Multiplexer,
    reconnect: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    fallback: FallbackPoller,
    state: ConnectionState,
    retry_at: Option<Instant>,
    settle_at: Option<Instant>,
    ever_connected: bool,
    shutting_down: bool,
    cancel: CancellationToken,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        config: SessionConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, transport_events) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&shared);
        let sink: SnapshotSink = Arc::new(move |stream, payload| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(stream.as_str(), payload, DataSource::Fallback);
            }
        });

        Self {
            transport: Transport::new(connector, events_tx),
            transport_events,
            multiplexer: Multiplexer::new(),
            reconnect: ReconnectPolicy::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            fallback: FallbackPoller::new(snapshots, sink, config.fallback.poll_interval),
            state: ConnectionState::Disconnected,
            retry_at: None,
            settle_at: None,
            ever_connected: false,
            shutting_down: false,
            shared,
            config,
            commands,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let period = self.config.metrics_interval;
        let mut metrics_tick = interval_at(Instant::now() + period, period);
        metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.retry_at;
            let settle_at = self.settle_at;
            let heartbeat_at = self.heartbeat.next_deadline();
            let cooldown_at = self.cooldown_deadline();

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                    while let Ok(command) = self.commands.try_recv() {
                        self.handle_command(command);
                    }
                    self.flush_subscriptions();
                }
                Some(event) = self.transport_events.recv() => self.handle_transport_event(event),
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.open_socket(ConnectionState::Reconnecting);
                }
                _ = sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                    self.settle_at = None;
                    self.open_socket(ConnectionState::Reconnecting);
                }
                _ = sleep_until(heartbeat_at.unwrap_or_else(Instant::now)), if heartbeat_at.is_some() => {
                    self.on_heartbeat_deadline();
                }
                _ = sleep_until(cooldown_at.unwrap_or_else(Instant::now)), if cooldown_at.is_some() => {
                    self.on_cooldown_elapsed();
                }
                _ = metrics_tick.tick() => self.publish_metrics(),
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, state = %self.state, "session command");
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::ForceReconnect => self.force_reconnect("forced reconnect"),
            Command::ResetCircuit => self.sync_fallback(),
            Command::StreamAdded(stream) | Command::StreamRemoved(stream) => {
                self.multiplexer.mark_dirty(stream);
            }
        }
    }

    /// Send batched control messages for streams changed since the last flush.
    fn flush_subscriptions(&mut self) {
        if !self.multiplexer.has_pending() {
            return;
        }
        if self.transport.is_open() {
            let messages = {
                let registry = lock(&self.shared.registry);
                self.multiplexer.flush(&registry)
            };
            for message in &messages {
                self.send_control(message);
            }
        }
        self.sync_fallback();
    }

    fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            debug!(state = %self.state, "connect ignored");
            return;
        }
        self.reconnect.reset();
        self.open_socket(ConnectionState::Connecting);
    }

    fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected && self.transport.current_id().is_none() {
            debug!("disconnect ignored, already disconnected");
            return;
        }
        self.set_state(ConnectionState::Disconnecting);
        self.retry_at = None;
        self.settle_at = None;
        self.reconnect.reset();
        self.drop_socket("client disconnect");
        self.set_state(ConnectionState::Disconnected);
    }

    /// Close the socket, skip backoff, and reopen after the settle delay.
    fn force_reconnect(&mut self, reason: &str) {
        if let Some(remaining) = lock(&self.shared.breaker).retry_in(Instant::now()) {
            self.emit_error(
                ErrorKind::CircuitOpen,
                format!("{reason} refused, circuit open for {}ms", remaining.as_millis()),
            );
            return;
        }
        info!(reason, settle_ms = self.config.force_reconnect_settle.as_millis() as u64, "forcing reconnect");
        self.drop_socket(reason);
        self.retry_at = None;
        self.reconnect.reset();
        self.settle_at = Some(Instant::now() + self.config.force_reconnect_settle);
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Every socket open goes through the breaker gate.
    fn open_socket(&mut self, target: ConnectionState) {
        let gate = lock(&self.shared.breaker).allow_attempt(Instant::now());
        if let Err(remaining) = gate {
            self.emit_error(
                ErrorKind::CircuitOpen,
                format!("connection attempt blocked, circuit open for {}ms", remaining.as_millis()),
            );
            self.enter_failed();
            return;
        }
        let id = self.transport.open(&self.config.stream_url);
        debug!(connection_id = id, url = %self.config.stream_url, "opening stream socket");
        self.set_state(target);
    }

    fn drop_socket(&mut self, reason: &str) {
        self.heartbeat.stop();
        self.multiplexer.on_close();
        let Some(id) = self.transport.current_id() else {
            return;
        };
        self.transport.close();
        lock(&self.shared.metrics).record_disconnected();
        self.shared.emit(SessionEvent::Disconnect {
            connection_id: Some(id),
            reason: reason.to_string(),
        });
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.transport.accept(&event) {
            return;
        }
        match event {
            TransportEvent::Open { id } => self.on_open(id),
            TransportEvent::Message { text, .. } => self.on_message(&text),
            TransportEvent::Pong { payload, .. } => self.on_pong(&payload),
            TransportEvent::Error { message, .. } => self.emit_error(ErrorKind::Transport, message),
            TransportEvent::Closed { id, reason } => self.on_closed(id, reason),
        }
    }

    fn on_open(&mut self, id: ConnectionId) {
        let now = Instant::now();
        let reconnected = self.ever_connected;
        self.ever_connected = true;
        self.reconnect.reset();
        self.retry_at = None;
        lock(&self.shared.breaker).record_success();
        lock(&self.shared.metrics).record_connected(now, reconnected);

        let wanted = lock(&self.shared.registry).active_streams();
        if let Some(message) = self.multiplexer.on_open(wanted) {
            self.send_control(&message);
        }
        self.heartbeat.start(now);

        info!(connection_id = id, reconnected, "stream connected");
        self.set_state(ConnectionState::Connected);
        self.shared.emit(SessionEvent::Connect { connection_id: id });
    }

    fn on_message(&mut self, text: &str) {
        lock(&self.shared.metrics).record_message(Instant::now());
        match parse_frame(text) {
            Ok(InboundFrame::Stream { stream, data }) => {
                if self.shared.deliver(&stream, data, DataSource::Live) == 0 {
                    debug!(stream = %stream, "frame for stream without subscribers");
                }
                self.shared.emit(SessionEvent::Message { stream });
            }
            Ok(InboundFrame::Derived { stream, data }) => {
                if self.shared.deliver_derived(&stream, data) == 0 {
                    debug!(stream = %stream, "frame for stream without subscribers");
                }
                self.shared.emit(SessionEvent::Message { stream });
            }
            Ok(InboundFrame::Ack { id }) => debug!(request_id = id, "ws control acknowledged"),
            Ok(InboundFrame::ApiError { id, code, message }) => {
                self.emit_error(
                    ErrorKind::Protocol,
                    format!("control request {id:?} rejected ({code}): {message}"),
                );
            }
            Ok(InboundFrame::Unroutable(_)) => log_unroutable_once(text),
            Err(err) => {
                log_parse_fail_once(&err, text);
                self.emit_error(ErrorKind::Protocol, format!("malformed frame dropped: {err}"));
            }
        }
    }

    fn on_pong(&mut self, payload: &[u8]) {
        if let Some(latency) = self.heartbeat.acknowledge(payload, Instant::now()) {
            lock(&self.shared.metrics).record_latency(latency);
            self.shared.emit(SessionEvent::Heartbeat {
                success: true,
                latency: Some(latency),
            });
        }
    }

    fn on_closed(&mut self, id: ConnectionId, reason: Option<String>) {
        let reason = reason.unwrap_or_else(|| "connection closed".to_string());
        self.heartbeat.stop();
        self.multiplexer.on_close();
        lock(&self.shared.metrics).record_disconnected();
        self.shared.emit(SessionEvent::Disconnect {
            connection_id: Some(id),
            reason: reason.clone(),
        });
        warn!(connection_id = id, reason = %reason, state = %self.state, "stream socket closed unexpectedly");
        self.handle_failure();
    }

    fn handle_failure(&mut self) {
        let now = Instant::now();
        let opened = lock(&self.shared.breaker).record_failure(now);
        if lock(&self.shared.breaker).is_open() {
            if opened {
                self.emit_error(
                    ErrorKind::CircuitOpen,
                    "circuit breaker opened after repeated connection failures".to_string(),
                );
            }
            self.enter_failed();
            return;
        }

        match self.reconnect.next_delay() {
            Some(delay) => {
                self.retry_at = Some(now + delay);
                lock(&self.shared.metrics).record_reconnect_attempt();
                let attempt = self.reconnect.attempts();
                let max_attempts = self.reconnect.max_attempts();
                info!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.set_state(ConnectionState::Reconnecting);
                self.shared.emit(SessionEvent::Reconnect {
                    attempt,
                    max_attempts,
                    delay,
                });
            }
            None => {
                lock(&self.shared.breaker).trip(now);
                self.emit_error(
                    ErrorKind::Exhausted,
                    format!(
                        "reconnection abandoned after {} attempts",
                        self.reconnect.max_attempts()
                    ),
                );
                self.enter_failed();
            }
        }
    }

    fn on_heartbeat_deadline(&mut self) {
        let now = Instant::now();
        match self.heartbeat.poll(now) {
            HeartbeatAction::Probe(payload) => {
                self.transport.send(OutboundFrame::Ping(payload));
            }
            HeartbeatAction::TimedOut { waited } => {
                self.shared.emit(SessionEvent::Heartbeat {
                    success: false,
                    latency: None,
                });
                self.emit_error(
                    ErrorKind::Liveness,
                    format!("no heartbeat acknowledgement after {}ms", waited.as_millis()),
                );
                if lock(&self.shared.breaker).record_failure(now) {
                    self.drop_socket("heartbeat timeout");
                    self.emit_error(
                        ErrorKind::CircuitOpen,
                        "circuit breaker opened after heartbeat timeout".to_string(),
                    );
                    self.enter_failed();
                } else {
                    self.force_reconnect("heartbeat timeout");
                }
            }
            HeartbeatAction::Idle => {}
        }
    }

    /// End of the breaker cooldown, whatever the connection state.
    fn cooldown_deadline(&self) -> Option<Instant> {
        let breaker = lock(&self.shared.breaker);
        breaker.is_open().then(|| breaker.next_retry_at()).flatten()
    }

    /// Failed sessions probe the endpoint; otherwise the breaker only goes half-open.
    fn on_cooldown_elapsed(&mut self) {
        if self.state == ConnectionState::Failed {
            info!("circuit cooldown elapsed, probing endpoint");
            lock(&self.shared.metrics).record_reconnect_attempt();
            self.open_socket(ConnectionState::Reconnecting);
            return;
        }
        if lock(&self.shared.breaker).cooldown_elapsed(Instant::now()) {
            debug!(state = %self.state, "circuit half-open, awaiting next attempt");
            self.sync_fallback();
        }
    }

    fn enter_failed(&mut self) {
        self.retry_at = None;
        self.settle_at = None;
        self.set_state(ConnectionState::Failed);
        // state may already be failed; breaker status can still have changed
        self.sync_fallback();
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let from = std::mem::replace(&mut self.state, next);
        self.shared.state.send_replace(next);
        info!(from = %from, to = %next, "connection state changed");
        self.shared
            .emit(SessionEvent::StateChange { from, to: next });
        self.sync_fallback();
    }

    /// Poll every registered stream while disconnected, failed, or behind an open breaker.
    fn sync_fallback(&mut self) {
        let breaker_open = lock(&self.shared.breaker).is_open();
        let active = self.config.fallback.enabled
            && !self.shutting_down
            && (self.state.is_degraded() || breaker_open);
        let streams = if active {
            lock(&self.shared.registry).stream_names()
        } else {
            Vec::new()
        };
        self.fallback.sync(active, &streams);
        *lock(&self.shared.fallback_streams) = self.fallback.polling_streams();
    }

    fn send_control(&self, message: &ControlMessage) {
        if self.transport.send(OutboundFrame::Text(message.to_json())) {
            log_control_sent(message);
        }
    }

    fn emit_error(&self, kind: ErrorKind, message: String) {
        warn!(kind = %kind, error = %message, "session error");
        lock(&self.shared.metrics).record_error(message.clone(), Instant::now());
        self.shared.emit(SessionEvent::Error { kind, message });
    }

    fn publish_metrics(&self) {
        let listeners = lock(&self.shared.listeners).callbacks();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.shared.snapshot_metrics();
        notify_metrics_listeners(&listeners, &snapshot);
    }

    fn teardown(&mut self) {
        self.shutting_down = true;
        self.retry_at = None;
        self.settle_at = None;
        self.drop_socket("session shutdown");
        self.fallback.stop_all();
        self.set_state(ConnectionState::Disconnected);
        lock(&self.shared.fallback_streams).clear();
        debug!("session driver stopped");
    }
}
