//! Bazaar client - resilient request and live-update layer
//!
//! This crate contains the HTTP and socket plumbing the marketplace frontend
//! talks to the backend through: an authenticated fetch wrapper with
//! single-flight token refresh, a caching request manager, and a connection
//! manager that falls back from the live socket to HTTP polling.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod auth;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod events;
pub mod fetch;
pub mod logging;
pub mod request_manager;
pub mod storage;
pub mod transport;
pub mod ws;

pub use auth::{AuthService, AuthSession, RefreshResult, SessionAuth, TokenRefreshCoordinator};
pub use clock::{Clock, TokioClock};
pub use config::ClientConfig;
pub use events::{EventBus, ListenerId};
pub use fetch::{FetchClient, FetchConfig, FetchOptions, FetchResponse, ResponseBody};
pub use request_manager::{RequestConfig, RequestManager, RequestManagerConfig, RequestOptions};
pub use storage::SessionStore;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use ws::{
    ConnectionManager, ConnectionManagerState, PollingConfig, SocketEvent, WebSocketService,
    WsConnection,
};

pub use bazaar_shared::{ApiError, ConnectionMode, LiveEvent};

/// Lock a std mutex, recovering the data if a previous holder panicked.
/// Guards must never be held across an `.await`.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
