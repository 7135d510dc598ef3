//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::fetch::FetchConfig;
use crate::request_manager::RequestManagerConfig;
use crate::ws::{PollingConfig, ReconnectConfig};

/// Top-level configuration for the request and live-update layers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// "development" | "production"
    pub app_env: String,
    pub log_level: String,
    /// Normalized API base, e.g. `https://api.example.com`
    pub api_base_url: String,
    /// Live-update socket endpoint
    pub ws_url: String,
    /// Treat the device as resource constrained and skip the socket
    pub low_power: bool,
    pub fetch: FetchConfig,
    pub requests: RequestManagerConfig,
    pub polling: PollingConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let api_base_url = api_base_url("localhost:10000");
        let ws_url = format!("{}/socket", http_to_ws(&api_base_url));
        Self {
            app_env: "development".to_string(),
            log_level: "bazaar_client=debug".to_string(),
            api_base_url,
            ws_url,
            low_power: false,
            fetch: FetchConfig::default(),
            requests: RequestManagerConfig::default(),
            polling: PollingConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the environment.
    ///
    /// Environment variables:
    /// - `BAZAAR_ENV`: "development" | "production" (default: "development")
    /// - `BAZAAR_LOG`: tracing filter (default: "bazaar_client=debug")
    /// - `BAZAAR_API_URL`: API host or URL (default: "localhost:10000")
    /// - `BAZAAR_WS_URL`: socket URL (default: API URL with ws scheme + "/socket")
    /// - `BAZAAR_LOW_POWER`: "true" to start in polling mode
    /// - `BAZAAR_REQUEST_TIMEOUT_MS`, `BAZAAR_REQUEST_RETRIES`, `BAZAAR_RETRY_DELAY_MS`
    /// - `BAZAAR_RATE_LIMIT_PER_MINUTE`
    /// - `BAZAAR_FETCH_TIMEOUT_MS`, `BAZAAR_FETCH_MAX_RETRIES`
    /// - `BAZAAR_POLL_BASE_MS`, `BAZAAR_POLL_MAX_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.app_env = std::env::var("BAZAAR_ENV").unwrap_or(config.app_env);
        config.log_level = std::env::var("BAZAAR_LOG").unwrap_or(config.log_level);

        if let Ok(api) = std::env::var("BAZAAR_API_URL") {
            config.api_base_url = api_base_url(&api);
            config.ws_url = format!("{}/socket", http_to_ws(&config.api_base_url));
        }
        if let Ok(ws) = std::env::var("BAZAAR_WS_URL") {
            config.ws_url = ws;
        }
        config.low_power = env_or("BAZAAR_LOW_POWER", false);

        config.requests.timeout = Duration::from_millis(env_or(
            "BAZAAR_REQUEST_TIMEOUT_MS",
            config.requests.timeout.as_millis() as u64,
        ));
        config.requests.retries = env_or("BAZAAR_REQUEST_RETRIES", config.requests.retries);
        config.requests.retry_delay = Duration::from_millis(env_or(
            "BAZAAR_RETRY_DELAY_MS",
            config.requests.retry_delay.as_millis() as u64,
        ));
        config.requests.max_requests_per_window =
            env_or("BAZAAR_RATE_LIMIT_PER_MINUTE", config.requests.max_requests_per_window);
        config.requests.base_url = config.api_base_url.clone();

        config.fetch.timeout = Duration::from_millis(env_or(
            "BAZAAR_FETCH_TIMEOUT_MS",
            config.fetch.timeout.as_millis() as u64,
        ));
        config.fetch.max_retries = env_or("BAZAAR_FETCH_MAX_RETRIES", config.fetch.max_retries);
        config.fetch.base_url = config.api_base_url.clone();

        config.polling.base_interval = Duration::from_millis(env_or(
            "BAZAAR_POLL_BASE_MS",
            config.polling.base_interval.as_millis() as u64,
        ));
        config.polling.max_interval = Duration::from_millis(env_or(
            "BAZAAR_POLL_MAX_MS",
            config.polling.max_interval.as_millis() as u64,
        ));

        config
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Check if a host is a local/development address.
pub fn is_local_address(host: &str) -> bool {
    let host_part = host.split(':').next().unwrap_or(host);
    host_part == "localhost"
        || host_part == "127.0.0.1"
        || host_part == "0.0.0.0"
        || host_part.starts_with("192.168.")
        || host_part.starts_with("10.")
}

/// Turn a bare host (or URL) into an API base URL without a trailing slash.
pub fn api_base_url(domain: &str) -> String {
    let domain = domain.trim();
    if domain.is_empty() {
        return String::new();
    }

    if domain.contains("://") {
        domain.trim_end_matches('/').to_string()
    } else if is_local_address(domain) {
        format!("http://{}", domain.trim_end_matches('/'))
    } else {
        format!("https://{}", domain.trim_end_matches('/'))
    }
}

/// Convert HTTP/HTTPS URL to WS/WSS
pub fn http_to_ws(url: &str) -> String {
    if url.starts_with("https://") {
        url.replacen("https://", "wss://", 1)
    } else if url.starts_with("http://") {
        url.replacen("http://", "ws://", 1)
    } else {
        url.to_string()
    }
}

/// Resolve `path` against `base`; absolute URLs pass through untouched.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if base.is_empty() {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        }
    } else {
        let base = base.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

/// The path component of a URL, used as the rate-limit key.
pub fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}
