//! Global fetch wrapper: the single choke point for authenticated HTTP calls.
//!
//! Every outcome, including transport failure and a dead session, comes back
//! as a [`FetchResponse`]; nothing here returns `Err` to the caller.

use std::sync::Arc;
use std::time::Duration;

use bazaar_shared::{error_message_from_body, ApiError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::auth::{AuthService, QueuedRequest, Recovery, RequestReplayer, TokenRefreshCoordinator};
use crate::backoff;
use crate::clock::{Clock, TokioClock};
use crate::config::join_url;
use crate::transport::{send_with_timeout, Headers, HttpRequest, HttpResponse, HttpTransport, Method};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Prefix for relative targets
    pub base_url: String,
    pub timeout: Duration,
    /// Network retries when a request does not set its own
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 1,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Send without credentials and never attempt a refresh
    pub skip_auth: bool,
    /// Do not refresh-and-retry on 401/403
    pub skip_retry: bool,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl FetchOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: None,
            skip_auth: false,
            skip_retry: false,
            max_retries: None,
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn skip_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response body decoded according to its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Discriminated result of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// `None` when the body was empty or claimed JSON but did not parse
    pub data: Option<ResponseBody>,
    pub success: bool,
    pub error: Option<String>,
    /// 0 when no response was received
    pub status: u16,
    pub headers: Headers,
}

impl FetchResponse {
    fn succeeded(resp: HttpResponse) -> Self {
        Self {
            data: decode_body(&resp),
            success: true,
            error: None,
            status: resp.status,
            headers: resp.headers,
        }
    }

    fn failure(error: impl Into<String>, status: u16, headers: Headers) -> Self {
        Self {
            data: None,
            success: false,
            error: Some(error.into()),
            status,
            headers,
        }
    }

    /// Deserialize a JSON body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        let value = self.data.as_ref()?.as_json()?;
        serde_json::from_value(value.clone()).ok()
    }
}

fn decode_body(resp: &HttpResponse) -> Option<ResponseBody> {
    let content_type = resp.content_type().unwrap_or_default().to_ascii_lowercase();

    if content_type.contains("json") {
        return match serde_json::from_slice(&resp.body) {
            Ok(value) => Some(ResponseBody::Json(value)),
            Err(e) => {
                tracing::debug!(status = resp.status, "success response with unparseable JSON body: {e}");
                None
            }
        };
    }
    if content_type.starts_with("text/") {
        return Some(ResponseBody::Text(resp.text()));
    }
    if resp.body.is_empty() {
        return None;
    }
    Some(ResponseBody::Bytes(resp.body.clone()))
}

fn is_write(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// HTTP client that attaches credentials, retries network failures and
/// recovers from expired tokens.
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthService>,
    refresh: Arc<TokenRefreshCoordinator>,
    clock: Arc<dyn Clock>,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn AuthService>,
        refresh: Arc<TokenRefreshCoordinator>,
        config: FetchConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            refresh,
            clock: Arc::new(TokioClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn coordinator(&self) -> &Arc<TokenRefreshCoordinator> {
        &self.refresh
    }

    pub async fn request(&self, target: &str, options: FetchOptions) -> FetchResponse {
        let url = join_url(&self.config.base_url, target);
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let mut attempt: u32 = 0;
        let mut auth_retried = false;

        loop {
            let request = self.build_request(&url, &options).await;

            let resp = match send_with_timeout(self.transport.as_ref(), request, timeout).await {
                Ok(resp) => resp,
                Err(e) => {
                    attempt += 1;
                    if attempt <= max_retries {
                        let delay = backoff::network_retry(attempt);
                        tracing::warn!(
                            %url,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "request failed, retrying: {}",
                            e.detail()
                        );
                        self.clock.sleep(delay).await;
                        continue;
                    }
                    tracing::error!(%url, attempts = attempt, "request failed: {}", e.detail());
                    return FetchResponse::failure(e.detail(), 0, Headers::new());
                }
            };

            if resp.is_success() {
                return FetchResponse::succeeded(resp);
            }

            let auth_rejected = resp.status == 401 || resp.status == 403;
            if auth_rejected && !options.skip_auth && !options.skip_retry && !auth_retried {
                match self.refresh.recover(&url, &options, self.replayer()).await {
                    Recovery::Queued(reply) => {
                        return match reply.await {
                            Ok(Ok(replayed)) => replayed,
                            Ok(Err(e)) => {
                                tracing::debug!(%url, "parked request rejected: {}", e.detail());
                                FetchResponse::failure(
                                    ApiError::AuthenticationFailed.to_string(),
                                    resp.status,
                                    resp.headers,
                                )
                            }
                            Err(_) => FetchResponse::failure(
                                ApiError::AuthenticationFailed.to_string(),
                                resp.status,
                                resp.headers,
                            ),
                        };
                    }
                    Recovery::Refreshed(true) => {
                        tracing::debug!(%url, "token refreshed, re-issuing request");
                        auth_retried = true;
                        attempt += 1;
                        continue;
                    }
                    Recovery::Refreshed(false) => {
                        return FetchResponse::failure(
                            ApiError::AuthenticationFailed.to_string(),
                            resp.status,
                            resp.headers,
                        );
                    }
                }
            }

            let message = error_message_from_body(&resp.text())
                .unwrap_or_else(|| format!("Request failed with status {}", resp.status));
            tracing::debug!(%url, status = resp.status, %message, "request rejected");
            return FetchResponse::failure(message, resp.status, resp.headers);
        }
    }

    async fn build_request(&self, url: &str, options: &FetchOptions) -> HttpRequest {
        let mut request = HttpRequest::new(options.method.clone(), url);
        request.headers = options.headers.clone();
        request.body = options.body.clone();

        if !options.skip_auth && self.auth.is_authenticated() {
            for (name, value) in self.auth.auth_headers().await {
                if !request.has_header(&name) {
                    request.headers.push((name, value));
                }
            }
        }

        if is_write(&options.method) && request.body.is_some() && !request.has_header("content-type") {
            request
                .headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
        }

        request
    }

    fn replayer(&self) -> Arc<dyn RequestReplayer> {
        Arc::new(self.clone())
    }

    pub async fn get(&self, target: &str) -> FetchResponse {
        self.request(target, FetchOptions::new(Method::GET)).await
    }

    pub async fn post<T: Serialize>(&self, target: &str, payload: &T) -> FetchResponse {
        self.send_json(Method::POST, target, payload).await
    }

    pub async fn put<T: Serialize>(&self, target: &str, payload: &T) -> FetchResponse {
        self.send_json(Method::PUT, target, payload).await
    }

    pub async fn patch<T: Serialize>(&self, target: &str, payload: &T) -> FetchResponse {
        self.send_json(Method::PATCH, target, payload).await
    }

    pub async fn del(&self, target: &str) -> FetchResponse {
        self.request(target, FetchOptions::new(Method::DELETE)).await
    }

    async fn send_json<T: Serialize>(&self, method: Method, target: &str, payload: &T) -> FetchResponse {
        match serde_json::to_vec(payload) {
            Ok(body) => self.request(target, FetchOptions::new(method).body(body)).await,
            Err(e) => FetchResponse::failure(format!("failed to encode request body: {e}"), 0, Headers::new()),
        }
    }
}

impl RequestReplayer for FetchClient {
    fn replay(&self, request: QueuedRequest) {
        let client = self.clone();
        tokio::spawn(async move {
            let options = request.options.clone().skip_retry();
            let response = client.request(&request.url, options).await;
            request.resolve(response);
        });
    }
}
