//! Shared data models for the live-update and request layers.

use serde::{Deserialize, Serialize};

/// Which transport is currently delivering live updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Push over the socket.
    #[serde(rename = "websocket")]
    WebSocket,
    /// Periodic HTTP pull.
    Polling,
    /// Neither transport is active.
    Disabled,
}

impl ConnectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionMode::WebSocket => "websocket",
            ConnectionMode::Polling => "polling",
            ConnectionMode::Disabled => "disabled",
        }
    }
}

/// Payload of the `connection_mode_changed` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionModeChanged {
    pub mode: ConnectionMode,
}

/// Snapshot of one rate-limit window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub path: String,
    pub count: u32,
    pub remaining: u32,
    pub resets_in_ms: u64,
}
