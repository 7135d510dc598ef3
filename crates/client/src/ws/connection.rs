//! Live-update socket over tokio-tungstenite with automatic reconnect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bazaar_shared::{ApiError, LiveEvent, SocketEnvelope};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::service::{SocketEvent, SocketEventSink, WebSocketService};
use crate::lock;

/// Connection state for a WebSocket
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        crate::backoff::scaled(
            self.initial_delay,
            self.backoff_multiplier,
            attempt,
            self.max_delay,
        )
    }
}

/// State and event sink shared with the connection task.
#[derive(Default)]
struct Link {
    state: Mutex<ConnectionState>,
    sink: Mutex<Option<SocketEventSink>>,
}

impl Link {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn emit(&self, event: SocketEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            // Receiver gone means nobody is listening any more.
            let _ = sink.unbounded_send(event);
        }
    }
}

/// A managed WebSocket connection to the live-update endpoint.
pub struct WsConnection {
    url: String,
    reconnect: ReconnectConfig,
    low_power: bool,
    link: Arc<Link>,
    /// Channel for outgoing frames; `Some` while the connection task runs
    outbound: Mutex<Option<UnboundedSender<SocketEnvelope>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsConnection {
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            reconnect,
            low_power: false,
            link: Arc::new(Link::default()),
            outbound: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Mark the device as resource constrained: `connect` reports
    /// `ConnectionSkipped` instead of opening a socket.
    pub fn low_power(mut self, low_power: bool) -> Self {
        self.low_power = low_power;
        self
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.link.state).clone()
    }
}

impl WebSocketService for WsConnection {
    fn attach(&self, sink: SocketEventSink) {
        *lock(&self.link.sink) = Some(sink);
    }

    fn connect(&self) {
        if self.low_power {
            tracing::info!("low power mode, skipping live socket");
            self.link.emit(SocketEvent::ConnectionSkipped {
                reason: "low power mode".to_string(),
            });
            return;
        }

        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let (sender, receiver) = unbounded();
        *lock(&self.outbound) = Some(sender);
        *task = Some(tokio::spawn(connection_loop(
            self.url.clone(),
            self.reconnect.clone(),
            self.link.clone(),
            receiver,
        )));
    }

    fn disconnect(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        lock(&self.outbound).take();
        self.link.set_state(ConnectionState::Disconnected);
        tracing::debug!(url = %self.url, "live socket closed by client");
    }

    fn send(&self, event: &str, data: serde_json::Value) -> Result<(), ApiError> {
        if !self.is_connected() {
            return Err(ApiError::Network("socket is not connected".to_string()));
        }
        match lock(&self.outbound).as_ref() {
            Some(sender) => sender
                .unbounded_send(SocketEnvelope::new(event, data))
                .map_err(|e| ApiError::Network(e.to_string())),
            None => Err(ApiError::Network("socket is not connected".to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.link.state).is_connected()
    }

    fn is_optional_connection(&self) -> bool {
        self.low_power
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// Connect, pump frames until the socket closes, then reconnect with backoff.
/// Ends when the outbound sender is dropped or reconnect attempts run out.
async fn connection_loop(
    url: String,
    reconnect: ReconnectConfig,
    link: Arc<Link>,
    mut outbound: UnboundedReceiver<SocketEnvelope>,
) {
    let mut attempt = 0u32;

    loop {
        if attempt == 0 {
            link.set_state(ConnectionState::Connecting);
        } else {
            link.set_state(ConnectionState::Reconnecting { attempt });
        }

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                link.set_state(ConnectionState::Connected);
                attempt = 0;
                tracing::info!(%url, "live socket connected");
                link.emit(SocketEvent::Connected);

                let (mut write, mut read) = ws_stream.split();

                let reason = loop {
                    tokio::select! {
                        frame = read.next() => match frame {
                            Some(Ok(Message::Text(text))) => dispatch(&link, text.as_str()),
                            Some(Ok(Message::Close(frame))) => {
                                break frame
                                    .map(|f| f.reason.as_str().to_string())
                                    .filter(|r| !r.is_empty())
                                    .unwrap_or_else(|| "closed by server".to_string());
                            }
                            // Pong is handled automatically by tungstenite
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break e.to_string(),
                            None => break "stream ended".to_string(),
                        },
                        envelope = outbound.next() => match envelope {
                            Some(envelope) => match serde_json::to_string(&envelope) {
                                Ok(json) => {
                                    tracing::debug!(event = %envelope.event, "sending frame");
                                    if let Err(e) = write.send(Message::Text(json.into())).await {
                                        break e.to_string();
                                    }
                                }
                                Err(e) => tracing::error!("failed to encode frame: {e}"),
                            },
                            None => {
                                let _ = write.close().await;
                                link.set_state(ConnectionState::Disconnected);
                                return;
                            }
                        },
                    }
                };

                tracing::warn!(%url, %reason, "live socket closed");
                link.set_state(ConnectionState::Disconnected);
                link.emit(SocketEvent::Disconnected { reason });
                tokio::time::sleep(reconnect.delay_for_attempt(0)).await;
            }
            Err(e) => {
                tracing::error!(%url, "live socket error: {e}");
                link.emit(SocketEvent::Error {
                    message: e.to_string(),
                });

                if reconnect.max_attempts > 0 && attempt >= reconnect.max_attempts {
                    link.set_state(ConnectionState::Failed {
                        reason: format!(
                            "Max reconnect attempts ({}) exceeded",
                            reconnect.max_attempts
                        ),
                    });
                    link.emit(SocketEvent::ReconnectionFailed);
                    return;
                }

                let delay = reconnect.delay_for_attempt(attempt);
                tracing::info!(
                    %url,
                    delay_ms = delay.as_millis() as u64,
                    attempt = attempt + 1,
                    "reconnecting live socket"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn dispatch(link: &Link, text: &str) {
    match serde_json::from_str::<SocketEnvelope>(text) {
        Ok(envelope) => link.emit(SocketEvent::Message {
            event: LiveEvent::parse(&envelope.event),
            data: envelope.data,
        }),
        Err(e) => tracing::warn!("failed to parse socket frame: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_grows_and_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2250));
        assert_eq!(config.delay_for_attempt(20), Duration::from_millis(30000));
    }

    #[test]
    fn low_power_connect_is_skipped() {
        let connection = WsConnection::new("ws://localhost:1/socket", ReconnectConfig::default())
            .low_power(true);
        let (sink, mut events) = unbounded();
        connection.attach(sink);

        assert!(connection.is_optional_connection());
        connection.connect();

        match events.try_next() {
            Ok(Some(SocketEvent::ConnectionSkipped { .. })) => {}
            other => panic!("expected connection_skipped, got {other:?}"),
        }
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_requires_an_open_socket() {
        let connection = WsConnection::new("ws://localhost:1/socket", ReconnectConfig::default());
        let result = connection.send("ping", serde_json::Value::Null);
        assert!(matches!(result, Err(ApiError::Network(_))));
    }
}
