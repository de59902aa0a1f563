/*
[INPUT]:  Stream endpoint URL, subscription changes, raw frames
[OUTPUT]: Id-tagged socket events and demultiplexed stream payloads
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new frame types or changing connection logic
*/

pub mod message;
pub mod multiplexer;
pub mod transport;

pub use message::{ControlMessage, ControlMethod, InboundFrame, parse_frame};
pub use multiplexer::{
    Multiplexer, StreamCallback, StreamMessage, SubscriptionId, SubscriptionRegistry,
};
pub use transport::{
    ConnectionId, Connector, OutboundFrame, SocketLink, Transport, TransportEvent,
    TungsteniteConnector,
};
