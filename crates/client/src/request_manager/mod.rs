//! Deduplicating, rate-limited, cached request façade for read-heavy traffic.
//!
//! Order of checks for every call:
//!
//! ```text
//! fresh cache hit ──► return
//!        │
//! rate-limit window ──► over budget: stale cache or RateLimited
//!        │
//! pending request for same key (< 30s) ──► share its result
//!        │
//! execute with retry ──► cache on success / stale cache on exhausted 503
//! ```
//!
//! Unlike [`crate::FetchClient`], terminal failures are returned as `Err`.

mod cache;
mod pending;
mod rate_limit;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bazaar_shared::{error_message_from_body, ApiError, RateLimitStatus};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backoff;
use crate::clock::{Clock, TokioClock};
use crate::config::{join_url, url_path};
use crate::lock;
use crate::transport::{send_with_timeout, HttpRequest, HttpResponse, HttpTransport, Method};

pub use cache::{default_ttl_rules, ttl_for, CacheTtlRule};
use cache::ResponseCache;
use pending::PendingRequests;
use rate_limit::RateLimiter;

/// Identity of a request for caching and deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
    pub body: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &str, body: Option<&str>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            body: body.unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestManagerConfig {
    /// Prefix for relative URLs
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    /// Base of the generic exponential backoff
    pub retry_delay: Duration,
    pub rate_limit_window: Duration,
    pub max_requests_per_window: u32,
    /// Pending requests older than this are not joined
    pub pending_stale_after: Duration,
    pub default_ttl: Duration,
    pub ttl_rules: Vec<CacheTtlRule>,
    /// Expired entries older than this are dropped on read
    pub stale_horizon: Option<Duration>,
}

impl Default for RequestManagerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(20),
            retries: 2,
            retry_delay: Duration::from_millis(3000),
            rate_limit_window: Duration::from_secs(60),
            max_requests_per_window: 10,
            pending_stale_after: Duration::from_secs(30),
            default_ttl: Duration::from_secs(60),
            ttl_rules: default_ttl_rules(),
            stale_horizon: Some(Duration::from_secs(3600)),
        }
    }
}

/// What to send.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    /// Serialized body; part of the request key
    pub body: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string());
        self
    }
}

/// How to send it. Unset fields fall back to [`RequestManagerConfig`].
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub deduplicate: bool,
    /// Read from and write to the response cache (GET/HEAD only)
    pub use_cache: bool,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            deduplicate: true,
            use_cache: true,
            retries: None,
            retry_delay: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPlan {
    retries: u32,
    retry_delay: Duration,
    timeout: Duration,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    config: RequestManagerConfig,
    cache: Mutex<ResponseCache>,
    rate_limits: Mutex<RateLimiter>,
    pending: Mutex<PendingRequests>,
}

/// Cheap to clone; clones share cache, windows and in-flight requests.
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<Inner>,
}

impl RequestManager {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RequestManagerConfig) -> Self {
        Self::with_clock(transport, Arc::new(TokioClock), config)
    }

    pub fn with_clock(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        config: RequestManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                clock,
                cache: Mutex::new(ResponseCache::new(config.stale_horizon)),
                rate_limits: Mutex::new(RateLimiter::new(
                    config.rate_limit_window,
                    config.max_requests_per_window,
                )),
                pending: Mutex::new(PendingRequests::new(config.pending_stale_after)),
                config,
            }),
        }
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
        config: RequestConfig,
    ) -> Result<T, ApiError> {
        let value = self.request_value(url, options, config).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Like [`RequestManager::request`] without the final deserialization.
    pub async fn request_value(
        &self,
        url: &str,
        options: RequestOptions,
        config: RequestConfig,
    ) -> Result<Value, ApiError> {
        let inner = &self.inner;
        let full_url = join_url(&inner.config.base_url, url);
        let key = RequestKey::new(options.method.as_str(), &full_url, options.body.as_deref());
        let get_like = options.method == Method::GET || options.method == Method::HEAD;
        let cacheable = get_like && config.use_cache;
        let now = inner.clock.now();

        if cacheable {
            if let Some(hit) = lock(&inner.cache).get_fresh(&key, now) {
                tracing::debug!(url = %full_url, "cache hit");
                return Ok(hit);
            }
        }

        let path = url_path(&full_url);
        if !lock(&inner.rate_limits).try_acquire(&path, now) {
            if get_like {
                if let Some(stale) = lock(&inner.cache).get_stale(&key, now) {
                    tracing::warn!(%path, "rate limit reached, serving stale cache");
                    return Ok(stale);
                }
            }
            tracing::warn!(%path, "rate limit reached, request refused");
            return Err(ApiError::RateLimited { path });
        }

        let response = {
            let mut pending = lock(&inner.pending);
            let joined = if config.deduplicate {
                pending.join(&key, now)
            } else {
                None
            };

            match joined {
                Some(in_flight) => {
                    tracing::debug!(url = %full_url, "joining in-flight request");
                    in_flight
                }
                None => {
                    let id = pending.next_id();
                    let plan = RetryPlan {
                        retries: config.retries.unwrap_or(inner.config.retries),
                        retry_delay: config.retry_delay.unwrap_or(inner.config.retry_delay),
                        timeout: config.timeout.unwrap_or(inner.config.timeout),
                    };
                    let mut request = HttpRequest::new(options.method.clone(), full_url.clone());
                    request.headers = options.headers.clone();
                    if let Some(body) = &options.body {
                        if !request.has_header("content-type") {
                            request = request.header("Content-Type", "application/json");
                        }
                        request.body = Some(body.clone().into_bytes());
                    }

                    let response = execute(inner.clone(), key.clone(), request, plan, cacheable, id)
                        .boxed()
                        .shared();
                    pending.insert(key, id, now, response.clone());
                    response
                }
            }
        };

        response.await
    }

    pub fn rate_limit_status(&self) -> Vec<RateLimitStatus> {
        lock(&self.inner.rate_limits).status(self.inner.clock.now())
    }

    /// Forget in-flight requests; callers already waiting keep their result.
    pub fn clear_pending_requests(&self) {
        lock(&self.inner.pending).clear();
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn clear_cache(&self) {
        lock(&self.inner.cache).clear();
    }
}

async fn execute(
    inner: Arc<Inner>,
    key: RequestKey,
    request: HttpRequest,
    plan: RetryPlan,
    cacheable: bool,
    id: u64,
) -> Result<Value, ApiError> {
    let result = run_with_retry(&inner, &request, plan).await;
    let now = inner.clock.now();

    let outcome = match result {
        Ok(value) => {
            if cacheable {
                let ttl = ttl_for(&key.url, &inner.config.ttl_rules, inner.config.default_ttl);
                lock(&inner.cache).insert(key.clone(), value.clone(), ttl, now);
            }
            Ok(value)
        }
        Err(ApiError::ServiceUnavailable) => {
            let stale = lock(&inner.cache).get_stale(&key, now);
            match stale {
                Some(stale) => {
                    tracing::warn!(url = %key.url, "service unavailable, serving stale cache");
                    Ok(stale)
                }
                None => {
                    tracing::error!(url = %key.url, "service unavailable after retries");
                    Err(ApiError::ServiceUnavailable)
                }
            }
        }
        Err(e) => {
            tracing::error!(url = %key.url, "request failed: {}", e.detail());
            Err(e)
        }
    };

    lock(&inner.pending).settle(&key, id);
    outcome
}

async fn run_with_retry(inner: &Inner, request: &HttpRequest, plan: RetryPlan) -> Result<Value, ApiError> {
    let mut attempt: u32 = 0;

    loop {
        let error = match send_with_timeout(inner.transport.as_ref(), request.clone(), plan.timeout).await {
            Ok(resp) if resp.is_success() => return decode_json(&resp),
            Ok(resp) => http_error(&resp),
            Err(e) => e,
        };

        if error.is_client_error() || attempt >= plan.retries {
            return Err(error);
        }

        let delay = if error.is_service_unavailable() {
            backoff::service_unavailable(attempt)
        } else {
            backoff::exponential(plan.retry_delay, attempt)
        };
        tracing::warn!(
            url = %request.url,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "request failed, retrying: {}",
            error.detail()
        );
        inner.clock.sleep(delay).await;
        attempt += 1;
    }
}

fn decode_json(resp: &HttpResponse) -> Result<Value, ApiError> {
    if resp.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&resp.body).map_err(|e| ApiError::Deserialize(e.to_string()))
}

fn http_error(resp: &HttpResponse) -> ApiError {
    if resp.status == 503 {
        return ApiError::ServiceUnavailable;
    }
    let message = error_message_from_body(&resp.text())
        .unwrap_or_else(|| format!("Request failed with status {}", resp.status));
    ApiError::Http {
        status: resp.status,
        message,
    }
}
