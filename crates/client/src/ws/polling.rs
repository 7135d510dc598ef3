//! HTTP polling used while the live socket is unavailable.

use std::time::Duration;

use bazaar_shared::LiveEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::backoff;

/// Class of data fetched by one polling endpoint; each class keeps its own
/// `since` cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollClass {
    Feed,
    Notifications,
    Communities,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollEndpoint {
    pub class: PollClass,
    pub path: String,
    /// Event each returned item is re-emitted as
    pub event: LiveEvent,
}

impl PollEndpoint {
    pub fn new(class: PollClass, path: impl Into<String>, event: LiveEvent) -> Self {
        Self {
            class,
            path: path.into(),
            event,
        }
    }
}

pub fn default_endpoints() -> Vec<PollEndpoint> {
    vec![
        PollEndpoint::new(PollClass::Feed, "/api/feed/updates", LiveEvent::FeedUpdate),
        PollEndpoint::new(PollClass::Notifications, "/api/notifications", LiveEvent::Notification),
        PollEndpoint::new(
            PollClass::Communities,
            "/api/communities/updates",
            LiveEvent::CommunityUpdate,
        ),
    ]
}

/// Polling cadence.
///
/// Polls go through the [`crate::RequestManager`] and share its per-path
/// budget (10 per minute by default). A resource-constrained device never
/// accumulates failures, so it polls every `base_interval`; at the default 5s
/// that is 12 ticks a minute, so ticks past the tenth in a window are skipped
/// locally until the window resets. Raise `base_interval` above 6s to poll on
/// every tick.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub base_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    /// Interval suggested to the UI while the socket is delivering updates
    pub realtime_refresh: Duration,
    pub endpoints: Vec<PollEndpoint>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(30),
            realtime_refresh: Duration::from_secs(60),
            endpoints: default_endpoints(),
        }
    }
}

impl PollingConfig {
    /// `min(base × factor^failures, max)`.
    pub fn interval(&self, failures: u32) -> Duration {
        backoff::scaled(self.base_interval, self.backoff_factor, failures, self.max_interval)
    }
}

/// Append the `since` cursor to an endpoint path.
pub(crate) fn poll_url(path: &str, since: Option<DateTime<Utc>>) -> String {
    match since {
        Some(since) => {
            let sep = if path.contains('?') { '&' } else { '?' };
            let stamp = since.to_rfc3339_opts(SecondsFormat::Millis, true);
            format!("{path}{sep}since={}", urlencoding::encode(&stamp))
        }
        None => path.to_string(),
    }
}

/// Items in a poll response: a bare array, an object wrapping one under
/// `data` or `items`, or a single object.
pub(crate) fn items(payload: Value) -> Vec<Value> {
    match payload {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["data", "items"] {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = map.remove(key) {
                        return items;
                    }
                }
            }
            vec![Value::Object(map)]
        }
        other => vec![other],
    }
}
