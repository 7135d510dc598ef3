//! Boundary between the connection manager and a socket implementation.

use bazaar_shared::{ApiError, LiveEvent};
use futures_channel::mpsc::UnboundedSender;
use serde_json::Value;

/// Lifecycle and domain events reported by a [`WebSocketService`].
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    /// Automatic reconnection gave up
    ReconnectionFailed,
    /// The service declined to open a socket (e.g. low-power device)
    ConnectionSkipped { reason: String },
    Message { event: LiveEvent, data: Value },
}

impl SocketEvent {
    pub fn name(&self) -> &str {
        match self {
            SocketEvent::Connected => "connected",
            SocketEvent::Disconnected { .. } => "disconnected",
            SocketEvent::Error { .. } => "error",
            SocketEvent::ReconnectionFailed => "reconnection_failed",
            SocketEvent::ConnectionSkipped { .. } => "connection_skipped",
            SocketEvent::Message { event, .. } => event.as_str(),
        }
    }
}

pub type SocketEventSink = UnboundedSender<SocketEvent>;

/// A live-update socket.
///
/// `connect` and `disconnect` return immediately; progress is reported through
/// the sink passed to `attach`. A manual `disconnect` is silent.
pub trait WebSocketService: Send + Sync {
    /// Route future events to `sink`, replacing any earlier sink.
    fn attach(&self, sink: SocketEventSink);

    fn connect(&self);

    fn disconnect(&self);

    fn send(&self, event: &str, data: Value) -> Result<(), ApiError>;

    fn is_connected(&self) -> bool;

    /// True when the device should avoid holding a socket open.
    fn is_optional_connection(&self) -> bool;
}
