//! Shared error types and error-body message extraction.

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// Some marketplace endpoints answer failures with a problem document; others
/// use the looser `{ "message": ... }` or `{ "error": ... }` shapes. All of them
/// are read through [`error_message_from_body`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// A URI reference that identifies the specific occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Pull a display message out of a JSON error body.
///
/// Checks problem details first, then a top-level `message` or `error`
/// string (or `error.message` when `error` is an object).
pub fn error_message_from_body(body: &str) -> Option<String> {
    if let Some(detail) = try_problem_detail(body) {
        return Some(detail);
    }

    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let non_empty = |v: Option<&serde_json::Value>| {
        v.and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    non_empty(value.get("message"))
        .or_else(|| non_empty(value.get("error")))
        .or_else(|| non_empty(value.get("error").and_then(|e| e.get("message"))))
}

/// API error type for client-side use.
///
/// `Display` yields the reworded, user-facing message. The raw cause, where
/// one exists, is available through [`ApiError::detail`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error. Please check your internet connection and try again.")]
    Network(String),
    #[error("Request timed out. Please try again.")]
    Timeout,
    #[error("Too many requests. Please wait a moment and try again.")]
    RateLimited { path: String },
    #[error("Our servers are temporarily unavailable. Please try again in a few minutes.")]
    ServiceUnavailable,
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("Unexpected response from the server.")]
    Deserialize(String),
    #[error("Authentication failed. Please log in again.")]
    AuthenticationFailed,
    #[error("Token refresh failed. Please log in again.")]
    TokenRefreshFailed(String),
}

impl ApiError {
    /// HTTP status associated with the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::ServiceUnavailable => Some(503),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::AuthenticationFailed | ApiError::TokenRefreshFailed(_) => Some(401),
            ApiError::Network(_) | ApiError::Timeout | ApiError::Deserialize(_) => None,
        }
    }

    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, ApiError::ServiceUnavailable)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Client errors other than 429 are never worth retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ApiError::Http { status, .. } if (400..500).contains(status) && *status != 429)
    }

    /// The underlying cause, for logs.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Network(msg) | ApiError::Deserialize(msg) | ApiError::TokenRefreshFailed(msg) => {
                msg.clone()
            }
            ApiError::RateLimited { path } => format!("rate limit exceeded for {path}"),
            ApiError::Http { status, message } => format!("HTTP {status}: {message}"),
            other => other.to_string(),
        }
    }
}
