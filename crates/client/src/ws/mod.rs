//! Live updates: socket connection, polling fallback and the manager that
//! switches between them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionManager               │
//! │   mode: websocket | polling | disabled       │
//! └──────────────────────────────────────────────┘
//!          ▲ SocketEvent              │ poll (since cursor)
//!          │                          ▼
//!   ┌──────────────────┐      ┌──────────────────┐
//!   │ WebSocketService │      │  RequestManager  │
//!   │  (WsConnection)  │      │ (HTTP, no cache) │
//!   └──────────────────┘      └──────────────────┘
//!          │                          │
//!          └────────────┬─────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │    EventBus     │
//!              │ feed_update ... │
//!              └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let socket = Arc::new(WsConnection::new(config.ws_url.clone(), config.reconnect.clone()));
//! let live = ConnectionManager::new(socket, requests, config.polling.clone());
//! live.on(LiveEvent::FeedUpdate, |item| println!("{item}"));
//! ```

mod connection;
mod manager;
mod polling;
mod service;

pub use connection::{ConnectionState, ReconnectConfig, WsConnection};
pub use manager::{ConnectionManager, ConnectionManagerState};
pub use polling::{default_endpoints, PollClass, PollEndpoint, PollingConfig};
pub use service::{SocketEvent, SocketEventSink, WebSocketService};
