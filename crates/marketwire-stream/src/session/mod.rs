/*
[INPUT]:  Application lifecycle calls, stream subscriptions, metrics listeners
[OUTPUT]: ConnectionSession facade over transport, multiplexer, policies and poller
[POS]:    Session layer - public entry point
[UPDATE]: When changing the public session surface
*/

pub mod circuit;
pub mod config;
mod driver;
pub mod event;
pub mod fallback;
mod handle;
pub mod heartbeat;
pub mod metrics;
pub mod reconnect;

use chrono::Utc;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::http::{ClientConfig, MarketClient, MarketwireError, Result};
use crate::types::{CircuitStatus, ConnectionState, DataSource, StreamName};
use crate::ws::{
    Connector, StreamCallback, StreamMessage, SubscriptionRegistry, TungsteniteConnector,
};

pub use circuit::{CircuitBreaker, CircuitSnapshot};
pub use config::{
    CircuitBreakerConfig, DEFAULT_STREAM_URL, FallbackConfig, HeartbeatConfig, ReconnectConfig,
    SessionConfig,
};
pub use event::{ErrorKind, SessionEvent};
pub use fallback::{FallbackPoller, SnapshotSource};
pub use handle::SubscriptionHandle;
pub use heartbeat::HeartbeatMonitor;
pub use metrics::{ConnectionMetrics, MetricsCallback};
pub use reconnect::ReconnectPolicy;

pub(crate) use driver::Command;
use driver::Driver;
use metrics::{MetricsListeners, MetricsRecorder};

const EVENT_CAPACITY: usize = 1024;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn notify_metrics_listeners(listeners: &[MetricsCallback], snapshot: &ConnectionMetrics) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
            error!("metrics listener panicked");
        }
    }
}

/// State shared between the facade, handles, poll tasks and the driver.
pub(crate) struct Shared {
    pub(crate) registry: Mutex<SubscriptionRegistry>,
    pub(crate) metrics: Mutex<MetricsRecorder>,
    pub(crate) breaker: Mutex<CircuitBreaker>,
    pub(crate) listeners: Mutex<MetricsListeners>,
    pub(crate) fallback_streams: Mutex<Vec<String>>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
}

impl Shared {
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Invoke every callback registered under `stream`. Returns how many ran.
    pub(crate) fn deliver(&self, stream: &str, data: Value, source: DataSource) -> usize {
        let callbacks = lock(&self.registry).callbacks_for(stream);
        self.dispatch(callbacks, stream, data, source)
    }

    /// Like `deliver`, for a key derived from a raw payload.
    pub(crate) fn deliver_derived(&self, key: &str, data: Value) -> usize {
        let callbacks = lock(&self.registry).callbacks_for_derived(key);
        self.dispatch(callbacks, key, data, DataSource::Live)
    }

    fn dispatch(
        &self,
        callbacks: Vec<StreamCallback>,
        stream: &str,
        data: Value,
        source: DataSource,
    ) -> usize {
        if callbacks.is_empty() {
            return 0;
        }
        let message = StreamMessage {
            stream: stream.to_string(),
            data,
            source,
            received_at: Utc::now(),
        };
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
                error!(stream, "stream callback panicked");
            }
        }
        callbacks.len()
    }

    pub(crate) fn snapshot_metrics(&self) -> ConnectionMetrics {
        let state = *self.state.borrow();
        let circuit = lock(&self.breaker).status();
        let active_streams = lock(&self.registry).len();
        let fallback_streams = lock(&self.fallback_streams).len();
        lock(&self.metrics).snapshot(
            Instant::now(),
            state,
            circuit,
            active_streams,
            fallback_streams,
        )
    }
}

/// The one object application code talks to. Construct once, share by reference,
/// and call `shutdown` (or drop it) at application exit.
///
/// Every method is safe in any state and never waits on the network; lifecycle
/// calls are queued to a driver task and their outcome is observable through
/// `connection_state`, `subscribe_state` and `subscribe_events`.
pub struct ConnectionSession {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Session against the real exchange endpoints in `config`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let connector = Arc::new(TungsteniteConnector::new(config.connect_timeout));
        let client_config = ClientConfig {
            connect_timeout: config.connect_timeout,
            ..ClientConfig::default()
        };
        let snapshots = Arc::new(MarketClient::with_config_and_base_url(
            client_config,
            &config.rest_url,
        )?);
        Self::with_components(config, connector, snapshots)
    }

    /// Session with caller-provided socket and snapshot implementations.
    pub fn with_components(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            MarketwireError::Config("ConnectionSession requires a running tokio runtime".to_string())
        })?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            registry: Mutex::new(SubscriptionRegistry::new()),
            metrics: Mutex::new(MetricsRecorder::new(config.message_rate_window)),
            breaker: Mutex::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            listeners: Mutex::new(MetricsListeners::default()),
            fallback_streams: Mutex::new(Vec::new()),
            state: state_tx,
            events: events_tx,
            commands: commands_tx,
        });

        let cancel = CancellationToken::new();
        let driver = Driver::new(
            Arc::clone(&shared),
            config,
            commands_rx,
            connector,
            snapshots,
            cancel.clone(),
        );
        let handle = runtime.spawn(driver.run());

        Ok(Self {
            shared,
            cancel,
            driver: Mutex::new(Some(handle)),
        })
    }

    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Drop the current socket and reconnect after the settle delay, skipping backoff.
    /// Refused while the circuit breaker is open.
    pub fn force_reconnect(&self) {
        self.send(Command::ForceReconnect);
    }

    /// Close the breaker immediately with counters zeroed. Does not reconnect by itself.
    pub fn reset_circuit_breaker(&self) {
        lock(&self.shared.breaker).reset();
        self.send(Command::ResetCircuit);
    }

    /// Register `callback` for `stream`. Repeated calls for one stream are additive.
    /// A malformed stream name yields an inert handle and an `InvalidSubscription` error event.
    pub fn subscribe<F>(&self, stream: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&StreamMessage) + Send + Sync + 'static,
    {
        self.register([stream], Arc::new(callback))
    }

    /// Register one callback for several streams behind a single handle.
    pub fn connect_to_streams<I, S, F>(&self, streams: I, callback: F) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&StreamMessage) + Send + Sync + 'static,
    {
        self.register(streams, Arc::new(callback))
    }

    fn register<I, S>(&self, streams: I, callback: StreamCallback) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();
        let mut added = Vec::new();
        for raw in streams {
            let raw = raw.as_ref();
            let name = match StreamName::parse(raw) {
                Ok(name) => name,
                Err(err) => {
                    warn!(stream = raw, error = %err, "subscription rejected");
                    self.shared.emit(SessionEvent::Error {
                        kind: ErrorKind::InvalidSubscription,
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            let key = name.as_str().to_string();
            let (id, first) = lock(&self.shared.registry).register(name, Arc::clone(&callback));
            debug!(stream = %key, subscription_id = id, first, "stream subscribed");
            if first {
                added.push(key.clone());
            }
            entries.push((key, id));
        }

        for stream in added {
            self.send(Command::StreamAdded(stream));
        }
        if entries.is_empty() {
            return SubscriptionHandle::inert();
        }
        SubscriptionHandle::for_streams(Arc::downgrade(&self.shared), entries)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn active_streams(&self) -> Vec<String> {
        lock(&self.shared.registry).active_streams()
    }

    /// Streams currently served by REST polling.
    pub fn fallback_streams(&self) -> Vec<String> {
        lock(&self.shared.fallback_streams).clone()
    }

    pub fn circuit_status(&self) -> CircuitStatus {
        lock(&self.shared.breaker).status()
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        lock(&self.shared.breaker).snapshot(Instant::now())
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.snapshot_metrics()
    }

    /// Push a snapshot now and then once per metrics interval until the handle is released.
    pub fn add_metrics_listener<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&ConnectionMetrics) + Send + Sync + 'static,
    {
        let listener: MetricsCallback = Arc::new(listener);
        notify_metrics_listeners(std::slice::from_ref(&listener), &self.metrics());
        let id = lock(&self.shared.listeners).add(listener);
        SubscriptionHandle::metrics_listener(Arc::downgrade(&self.shared), id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Stop the driver and wait until every socket, timer and poll task is gone.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = lock(&self.driver).take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "session driver ended abnormally");
        }
    }

    fn send(&self, command: Command) {
        if self.shared.commands.send(command).is_err() {
            debug!("session driver stopped, command dropped");
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("state", &self.connection_state())
            .field("circuit", &self.circuit_status())
            .field("active_streams", &self.active_streams())
            .finish()
    }
}
