//! Connection manager: one live-update source, socket first, polling second.
//!
//! ```text
//!            connected
//!   ┌──────────────────────────────┐
//!   ▼                              │
//! websocket ── 3 failures / ───► polling ──disconnect()──► disabled
//!              reconnection_failed /
//!              connection_skipped
//! ```
//!
//! Subscribers see the same event names in both modes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bazaar_shared::{ConnectionMode, ConnectionModeChanged, LiveEvent};
use chrono::{DateTime, Utc};
use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::polling::{self, PollClass, PollEndpoint, PollingConfig};
use super::service::{SocketEvent, WebSocketService};
use crate::clock::{Clock, TokioClock};
use crate::events::{EventBus, ListenerId};
use crate::lock;
use crate::request_manager::{RequestConfig, RequestManager, RequestOptions};

/// Consecutive socket failures before falling back to polling.
const FAILURE_THRESHOLD: u32 = 3;

/// Snapshot returned by [`ConnectionManager::state`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionManagerState {
    pub mode: ConnectionMode,
    pub is_connected: bool,
    /// When an update was last delivered to subscribers
    pub last_update: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub resource_constrained: bool,
}

pub struct ConnectionManager {
    service: Arc<dyn WebSocketService>,
    requests: RequestManager,
    config: PollingConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    state: Mutex<ConnectionManagerState>,
    cursors: Mutex<HashMap<PollClass, DateTime<Utc>>>,
    polling: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create the manager and start connecting. Must be called inside a tokio
    /// runtime.
    pub fn new(
        service: Arc<dyn WebSocketService>,
        requests: RequestManager,
        config: PollingConfig,
    ) -> Arc<Self> {
        Self::with_clock(service, requests, config, Arc::new(TokioClock))
    }

    pub fn with_clock(
        service: Arc<dyn WebSocketService>,
        requests: RequestManager,
        config: PollingConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let constrained = service.is_optional_connection();
        let manager = Arc::new(Self {
            service,
            requests,
            config,
            clock,
            bus: EventBus::new(),
            state: Mutex::new(ConnectionManagerState {
                mode: ConnectionMode::WebSocket,
                is_connected: false,
                last_update: None,
                failure_count: 0,
                resource_constrained: constrained,
            }),
            cursors: Mutex::new(HashMap::new()),
            polling: Mutex::new(None),
            pump: Mutex::new(None),
        });

        let (sink, events) = unbounded();
        manager.service.attach(sink);
        *lock(&manager.pump) = Some(tokio::spawn(pump(Arc::downgrade(&manager), events)));

        if constrained {
            tracing::info!("resource constrained device, starting in polling mode");
            manager.start_polling();
        } else {
            manager.service.connect();
        }
        manager
    }

    /// Re-enable live updates after [`ConnectionManager::disconnect`], or retry
    /// the socket while polling.
    pub fn connect(self: &Arc<Self>) {
        let constrained = self.service.is_optional_connection();
        let use_polling = {
            let mut state = lock(&self.state);
            if state.mode == ConnectionMode::WebSocket && state.is_connected {
                return;
            }
            state.resource_constrained |= constrained;
            if state.mode == ConnectionMode::Disabled {
                state.mode = ConnectionMode::WebSocket;
                state.failure_count = 0;
            }
            state.resource_constrained
        };

        if use_polling {
            self.start_polling();
        } else {
            self.service.connect();
        }
    }

    /// Stop socket and polling. Calling it again has no effect.
    pub fn disconnect(&self) {
        {
            let mut state = lock(&self.state);
            if state.mode == ConnectionMode::Disabled {
                return;
            }
            state.mode = ConnectionMode::Disabled;
            state.is_connected = false;
        }
        self.stop_polling();
        self.service.disconnect();
        tracing::info!("live updates disabled");
        self.emit_mode(ConnectionMode::Disabled);
    }

    /// Forward an event over the socket. Returns `false` (and drops the event)
    /// unless the socket is the active source.
    pub fn send(&self, event: &str, data: Value) -> bool {
        let mode = lock(&self.state).mode;
        if mode != ConnectionMode::WebSocket {
            tracing::warn!(%event, mode = mode.as_str(), "cannot send without a live socket");
            return false;
        }
        match self.service.send(event, data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%event, "send failed: {}", e.detail());
                false
            }
        }
    }

    pub fn on(
        &self,
        event: impl Into<LiveEvent>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.bus.on(event, handler)
    }

    pub fn off(&self, event: impl Into<LiveEvent>, id: ListenerId) -> bool {
        self.bus.off(event, id)
    }

    pub fn state(&self) -> ConnectionManagerState {
        lock(&self.state).clone()
    }

    /// Drop the failure history and try the socket again. Polling keeps
    /// running until the socket reports `connected`.
    pub fn force_reconnect(self: &Arc<Self>) {
        let constrained = self.service.is_optional_connection();
        {
            let mut state = lock(&self.state);
            state.failure_count = 0;
            state.resource_constrained = constrained;
            state.is_connected = false;
            if state.mode == ConnectionMode::Disabled {
                state.mode = ConnectionMode::WebSocket;
            }
        }
        tracing::info!("forcing live socket reconnect");
        self.service.disconnect();
        if constrained {
            self.start_polling();
        } else {
            self.service.connect();
        }
    }

    pub fn is_real_time_available(&self) -> bool {
        let state = lock(&self.state);
        state.mode == ConnectionMode::WebSocket && state.is_connected
    }

    /// How often a screen should refresh on its own given the current mode.
    pub fn recommended_update_interval(&self) -> Duration {
        let state = lock(&self.state);
        match state.mode {
            ConnectionMode::WebSocket if state.is_connected => self.config.realtime_refresh,
            ConnectionMode::WebSocket | ConnectionMode::Polling => {
                self.config.interval(state.failure_count)
            }
            ConnectionMode::Disabled => self.config.max_interval,
        }
    }

    fn polling_interval(&self) -> Duration {
        self.config.interval(lock(&self.state).failure_count)
    }

    /// Apply `update` unless live updates are disabled. The mode check and the
    /// mutation happen under one lock so a concurrent `disconnect` cannot be
    /// undone.
    fn update_live_state<R>(&self, update: impl FnOnce(&mut ConnectionManagerState) -> R) -> Option<R> {
        let mut state = lock(&self.state);
        if state.mode == ConnectionMode::Disabled {
            return None;
        }
        Some(update(&mut state))
    }

    fn handle_socket_event(self: &Arc<Self>, event: SocketEvent) {
        tracing::debug!(event = event.name(), "socket event");

        match event {
            SocketEvent::Connected => {
                let activated = self.update_live_state(|state| {
                    state.mode = ConnectionMode::WebSocket;
                    state.is_connected = true;
                    state.failure_count = 0;
                });
                if activated.is_none() {
                    return;
                }
                self.stop_polling();
                tracing::info!("live socket active");
                self.emit_mode(ConnectionMode::WebSocket);
            }
            SocketEvent::Disconnected { reason: detail } | SocketEvent::Error { message: detail } => {
                let Some((failures, fall_back)) = self.update_live_state(|state| {
                    state.is_connected = false;
                    state.failure_count += 1;
                    (
                        state.failure_count,
                        state.failure_count >= FAILURE_THRESHOLD || state.resource_constrained,
                    )
                }) else {
                    return;
                };
                tracing::warn!(failures, %detail, "live socket lost");
                if fall_back {
                    self.start_polling();
                }
            }
            SocketEvent::ReconnectionFailed => {
                if self.update_live_state(|state| state.is_connected = false).is_some() {
                    tracing::warn!("live socket gave up reconnecting");
                    self.start_polling();
                }
            }
            SocketEvent::ConnectionSkipped { reason } => {
                let skipped = self.update_live_state(|state| {
                    state.is_connected = false;
                    state.resource_constrained = true;
                });
                if skipped.is_some() {
                    tracing::info!(%reason, "live socket skipped");
                    self.start_polling();
                }
            }
            SocketEvent::Message { event, data } => {
                if self.update_live_state(|state| state.last_update = Some(Utc::now())).is_some() {
                    self.bus.emit(&event, &data);
                }
            }
        }
    }

    /// No-op if the polling task is already running or live updates are
    /// disabled.
    fn start_polling(self: &Arc<Self>) {
        {
            let mut polling = lock(&self.polling);
            if polling.as_ref().is_some_and(|task| !task.is_finished()) {
                return;
            }
            if self
                .update_live_state(|state| state.mode = ConnectionMode::Polling)
                .is_none()
            {
                tracing::debug!("live updates disabled, not polling");
                return;
            }
            *polling = Some(tokio::spawn(poll_loop(Arc::downgrade(self))));
        }
        tracing::info!(
            interval_ms = self.polling_interval().as_millis() as u64,
            "falling back to polling"
        );
        self.emit_mode(ConnectionMode::Polling);
    }

    fn stop_polling(&self) {
        if let Some(task) = lock(&self.polling).take() {
            task.abort();
            tracing::debug!("polling stopped");
        }
    }

    fn is_polling(&self) -> bool {
        lock(&self.state).mode == ConnectionMode::Polling
    }

    fn emit_mode(&self, mode: ConnectionMode) {
        let payload = serde_json::to_value(ConnectionModeChanged { mode }).unwrap_or(Value::Null);
        self.bus.emit(&LiveEvent::ConnectionModeChanged, &payload);
    }

    /// Fetch every endpoint someone is listening to and re-emit the items.
    async fn poll_once(&self) {
        let endpoints: Vec<PollEndpoint> = self
            .config
            .endpoints
            .iter()
            .filter(|endpoint| self.bus.has_listeners(&endpoint.event))
            .cloned()
            .collect();

        for endpoint in endpoints {
            if !self.is_polling() {
                return;
            }

            let since = lock(&self.cursors).get(&endpoint.class).copied();
            let url = polling::poll_url(&endpoint.path, since);
            let started = Utc::now();
            let config = RequestConfig {
                use_cache: false,
                retries: Some(0),
                ..RequestConfig::default()
            };

            match self.requests.request_value(&url, RequestOptions::get(), config).await {
                Ok(payload) => {
                    lock(&self.cursors).insert(endpoint.class, started);
                    let items = polling::items(payload);
                    if items.is_empty() {
                        continue;
                    }
                    tracing::debug!(event = %endpoint.event, count = items.len(), "poll delivered updates");
                    lock(&self.state).last_update = Some(Utc::now());
                    for item in &items {
                        self.bus.emit(&endpoint.event, item);
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    tracing::debug!(path = %endpoint.path, "poll over request budget, skipped");
                }
                Err(e) => {
                    tracing::debug!(path = %endpoint.path, "poll failed: {}", e.detail());
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.polling).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.pump).take() {
            task.abort();
        }
    }
}

async fn pump(manager: Weak<ConnectionManager>, mut events: UnboundedReceiver<SocketEvent>) {
    while let Some(event) = events.next().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_socket_event(event);
    }
}

async fn poll_loop(manager: Weak<ConnectionManager>) {
    loop {
        let Some(this) = manager.upgrade() else {
            break;
        };
        this.poll_once().await;
        let interval = this.polling_interval();
        let clock = this.clock.clone();
        drop(this);

        clock.sleep(interval).await;
    }
}
