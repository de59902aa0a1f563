/*
[INPUT]:  Driver state transitions, socket outcomes, heartbeat results
[OUTPUT]: Closed SessionEvent variants for UI-layer observers
[POS]:    Session layer - event vocabulary
[UPDATE]: When adding new event kinds or payload fields
*/

use std::fmt;
use std::time::Duration;

use crate::types::ConnectionState;
use crate::ws::ConnectionId;

/// Failure classes surfaced through `SessionEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket error or close; recovered by reconnection
    Transport,
    /// Malformed or rejected frame; the frame is dropped
    Protocol,
    /// Heartbeat not acknowledged in time
    Liveness,
    /// Reconnection attempts used up
    Exhausted,
    /// A connection attempt was refused by the open breaker
    CircuitOpen,
    /// Malformed stream name passed to subscribe
    InvalidSubscription,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Liveness => "liveness",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::InvalidSubscription => "invalid_subscription",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connect {
        connection_id: ConnectionId,
    },
    Disconnect {
        connection_id: Option<ConnectionId>,
        reason: String,
    },
    Message {
        stream: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    StateChange {
        from: ConnectionState,
        to: ConnectionState,
    },
    Heartbeat {
        success: bool,
        latency: Option<Duration>,
    },
    Reconnect {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connect { .. } => "connect",
            SessionEvent::Disconnect { .. } => "disconnect",
            SessionEvent::Message { .. } => "message",
            SessionEvent::Error { .. } => "error",
            SessionEvent::StateChange { .. } => "state_change",
            SessionEvent::Heartbeat { .. } => "heartbeat",
            SessionEvent::Reconnect { .. } => "reconnect",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionEvent::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            SessionEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
