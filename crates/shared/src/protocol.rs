//! Live-update protocol: event names and the socket frame envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named events delivered to live-update subscribers.
///
/// Domain events carry the same names whether they arrived over the socket or
/// from a polling fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LiveEvent {
    FeedUpdate,
    Notification,
    CommunityUpdate,
    ConnectionModeChanged,
    /// Any other server-defined event name.
    Other(String),
}

impl LiveEvent {
    pub fn as_str(&self) -> &str {
        match self {
            LiveEvent::FeedUpdate => "feed_update",
            LiveEvent::Notification => "notification",
            LiveEvent::CommunityUpdate => "community_update",
            LiveEvent::ConnectionModeChanged => "connection_mode_changed",
            LiveEvent::Other(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "feed_update" => LiveEvent::FeedUpdate,
            "notification" => LiveEvent::Notification,
            "community_update" => LiveEvent::CommunityUpdate,
            "connection_mode_changed" => LiveEvent::ConnectionModeChanged,
            other => LiveEvent::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for LiveEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LiveEvent {
    fn from(name: &str) -> Self {
        LiveEvent::parse(name)
    }
}

/// A JSON text frame exchanged over the live-update socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketEnvelope {
    #[serde(default)]
    pub id: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub ts: DateTime<Utc>,
}

impl SocketEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            data,
            ts: Utc::now(),
        }
    }
}
