//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bazaar_client::auth::{AuthService, QueuedRequest, RefreshResult, RequestReplayer};
use bazaar_client::clock::Clock;
use bazaar_client::transport::{Headers, HttpRequest, HttpResponse, HttpTransport};
use bazaar_client::ws::{SocketEvent, SocketEventSink, WebSocketService};
use bazaar_client::ApiError;
use serde_json::Value;
use tokio::time::Instant;

/// Scripted reply of [`MockTransport`].
#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Body {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    NetworkError,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json(200, body)
    }

    fn into_response(self) -> Result<HttpResponse, ApiError> {
        let (status, content_type, body) = match self {
            Reply::Json(status, value) => (status, "application/json", value.to_string().into_bytes()),
            Reply::Body {
                status,
                content_type,
                body,
            } => (status, content_type, body),
            Reply::NetworkError => return Err(ApiError::Network("connection refused".to_string())),
        };
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

struct Route {
    pattern: String,
    replies: VecDeque<Reply>,
    last: Option<Reply>,
}

/// Transport answering from per-URL scripts. The last reply of a script
/// repeats once it is exhausted; unmatched URLs get 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Duration>,
    /// When set, requests without `Authorization: Bearer <token>` get 401
    bearer: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let transport = Self::default();
        *transport.delay.lock().unwrap() = delay;
        Arc::new(transport)
    }

    /// Script replies for URLs containing `pattern`.
    pub fn route(&self, pattern: &str, replies: impl IntoIterator<Item = Reply>) {
        self.routes.lock().unwrap().push(Route {
            pattern: pattern.to_string(),
            replies: replies.into_iter().collect(),
            last: None,
        });
    }

    pub fn require_bearer(&self, token: &str) {
        *self.bearer.lock().unwrap() = Some(token.to_string());
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, pattern: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(pattern))
            .count()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn next_reply(&self, request: &HttpRequest) -> Reply {
        if let Some(token) = self.bearer.lock().unwrap().as_ref() {
            let expected = format!("Bearer {token}");
            let presented = request
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
                .map(|(_, v)| v.as_str());
            if presented != Some(expected.as_str()) {
                return Reply::Json(401, serde_json::json!({ "message": "token expired" }));
            }
        }

        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|r| request.url.contains(&r.pattern)) else {
            return Reply::Json(404, serde_json::json!({ "message": "not found" }));
        };
        match route.replies.pop_front() {
            Some(reply) => {
                route.last = Some(reply.clone());
                reply
            }
            None => route
                .last
                .clone()
                .unwrap_or(Reply::Json(404, serde_json::json!({ "message": "not found" }))),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(&request).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshBehaviour {
    Succeed,
    Fail,
    Panic,
}

/// Auth double: refresh swaps the token to "fresh" (or fails) after a delay.
pub struct MockAuth {
    token: Mutex<String>,
    authenticated: AtomicBool,
    behaviour: RefreshBehaviour,
    refresh_delay: Duration,
    refreshes: AtomicUsize,
    logouts: AtomicUsize,
}

impl MockAuth {
    pub fn new(token: &str) -> Arc<Self> {
        Self::build(token, RefreshBehaviour::Succeed)
    }

    pub fn failing(token: &str) -> Arc<Self> {
        Self::build(token, RefreshBehaviour::Fail)
    }

    /// Refresh panics mid-flight.
    pub fn panicking(token: &str) -> Arc<Self> {
        Self::build(token, RefreshBehaviour::Panic)
    }

    fn build(token: &str, behaviour: RefreshBehaviour) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.to_string()),
            authenticated: AtomicBool::new(true),
            behaviour,
            refresh_delay: Duration::from_millis(50),
            refreshes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> String {
        self.token.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthService for MockAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn auth_headers(&self) -> Vec<(String, String)> {
        let token = self.token.lock().unwrap().clone();
        vec![("Authorization".to_string(), format!("Bearer {token}"))]
    }

    async fn refresh_token(&self) -> RefreshResult {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        match self.behaviour {
            RefreshBehaviour::Succeed => {
                *self.token.lock().unwrap() = "fresh".to_string();
                RefreshResult::ok("fresh")
            }
            RefreshBehaviour::Fail => RefreshResult::failed("refresh token revoked"),
            RefreshBehaviour::Panic => panic!("auth backend crashed"),
        }
    }

    async fn logout(&self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
    }
}

/// Tokio clock that records every requested sleep.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::time::sleep(duration).await;
    }
}

/// Socket double driven by the test through [`MockSocket::emit`].
#[derive(Default)]
pub struct MockSocket {
    sink: Mutex<Option<SocketEventSink>>,
    connected: AtomicBool,
    optional: bool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    sent: Mutex<Vec<(String, Value)>>,
}

impl MockSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A socket on a resource-constrained device.
    pub fn optional() -> Arc<Self> {
        Arc::new(Self {
            optional: true,
            ..Self::default()
        })
    }

    pub fn emit(&self, event: SocketEvent) {
        match &event {
            SocketEvent::Connected => self.connected.store(true, Ordering::SeqCst),
            SocketEvent::Disconnected { .. }
            | SocketEvent::Error { .. }
            | SocketEvent::ReconnectionFailed => self.connected.store(false, Ordering::SeqCst),
            _ => {}
        }
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.unbounded_send(event).unwrap();
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

impl WebSocketService for MockSocket {
    fn attach(&self, sink: SocketEventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn send(&self, event: &str, data: Value) -> Result<(), ApiError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ApiError::Network("socket is not connected".to_string()));
        }
        self.sent.lock().unwrap().push((event.to_string(), data));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_optional_connection(&self) -> bool {
        self.optional
    }
}

/// Replayer that rejects every parked request; for driving the refresh
/// coordinator without a fetch client.
pub struct RejectingReplayer;

impl RequestReplayer for RejectingReplayer {
    fn replay(&self, request: QueuedRequest) {
        request.reject(ApiError::AuthenticationFailed);
    }
}

/// Let spawned tasks run until they block on a timer or channel.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
