/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public marketwire-stream crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod http;
pub mod session;
pub mod types;
pub mod ws;

// Re-export commonly used types from http
pub use http::{ClientConfig, MarketClient, MarketwireError, Result};

// Re-export the session facade and its vocabulary
pub use session::{
    CircuitBreakerConfig, CircuitSnapshot, ConnectionMetrics, ConnectionSession, ErrorKind,
    FallbackConfig, HeartbeatConfig, ReconnectConfig, SessionConfig, SessionEvent,
    SnapshotSource, SubscriptionHandle,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{ConnectionId, Connector, OutboundFrame, SocketLink, StreamMessage, TransportEvent};
