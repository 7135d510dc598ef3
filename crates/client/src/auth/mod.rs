//! Authentication collaborator contract and token refresh coordination.

mod refresh;
mod session;

use async_trait::async_trait;

pub use refresh::{QueuedRequest, Recovery, RequestReplayer, TokenRefreshCoordinator};
pub use session::{AuthSession, SessionAuth};

/// Outcome of a token refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshResult {
    pub success: bool,
    pub token: Option<String>,
    pub error: Option<String>,
}

impl RefreshResult {
    pub fn ok(token: impl Into<String>) -> Self {
        Self {
            success: true,
            token: Some(token.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            error: Some(error.into()),
        }
    }
}

/// The session owner: supplies credentials and knows how to renew or drop them.
#[async_trait]
pub trait AuthService: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Headers to attach to an authenticated request.
    async fn auth_headers(&self) -> Vec<(String, String)>;

    async fn refresh_token(&self) -> RefreshResult;

    async fn logout(&self);
}
