//! Bearer-token session with persistence and refresh.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AuthService, RefreshResult};
use crate::config::join_url;
use crate::storage::SessionStore;
use crate::transport::{send_with_timeout, HttpRequest, HttpTransport, Method};

const REFRESH_PATH: &str = "/api/auth/refresh";
const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Stored session data
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user_id: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "token")]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// [`AuthService`] that keeps a bearer token session, optionally persisted
/// across restarts.
///
/// Refresh talks to the transport directly rather than through the fetch
/// wrapper, so a failing refresh can never recurse into another refresh.
pub struct SessionAuth {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    session: RwLock<Option<AuthSession>>,
    store: Option<SessionStore>,
}

impl SessionAuth {
    /// Session restored from (and written back to) the platform config
    /// directory.
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        match SessionStore::in_config_dir() {
            Some(store) => Self::with_store(transport, base_url, store),
            None => {
                tracing::warn!("no config directory, auth session will not persist");
                Self::in_memory(transport, base_url)
            }
        }
    }

    /// Session persisted in `store`. An unreadable store starts logged out.
    pub fn with_store(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        store: SessionStore,
    ) -> Self {
        let session = store.load().unwrap_or_else(|e| {
            tracing::warn!(path = %store.path().display(), "discarding stored session: {e:#}");
            None
        });
        Self {
            transport,
            base_url: base_url.into(),
            session: RwLock::new(session),
            store: Some(store),
        }
    }

    /// Session that lives only as long as this value.
    pub fn in_memory(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            session: RwLock::new(None),
            store: None,
        }
    }

    pub fn login(&self, session: AuthSession) {
        self.replace(Some(session));
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get the current user ID
    pub fn user_id(&self) -> Option<String> {
        self.session().map(|s| s.user_id)
    }

    fn replace(&self, session: Option<AuthSession>) {
        if let Some(store) = &self.store {
            let written = match session.as_ref() {
                Some(sess) => store.save(sess),
                None => store.clear(),
            };
            if let Err(e) = written {
                tracing::warn!(path = %store.path().display(), "failed to persist auth session: {e:#}");
            }
        }
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
    }
}

#[async_trait]
impl AuthService for SessionAuth {
    fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    async fn auth_headers(&self) -> Vec<(String, String)> {
        match self.session() {
            Some(sess) => vec![(
                "Authorization".to_string(),
                format!("Bearer {}", sess.access_token),
            )],
            None => Vec::new(),
        }
    }

    async fn refresh_token(&self) -> RefreshResult {
        let Some(mut sess) = self.session() else {
            return RefreshResult::failed("not logged in");
        };
        let Some(refresh_token) = sess.refresh_token.clone() else {
            return RefreshResult::failed("no refresh token");
        };

        let body = json!({ "refreshToken": refresh_token }).to_string().into_bytes();
        let mut request = HttpRequest::new(Method::POST, join_url(&self.base_url, REFRESH_PATH))
            .header("Content-Type", "application/json");
        request.body = Some(body);

        let resp = match send_with_timeout(self.transport.as_ref(), request, REFRESH_TIMEOUT).await {
            Ok(resp) => resp,
            Err(e) => return RefreshResult::failed(e.detail()),
        };

        if !resp.is_success() {
            return RefreshResult::failed(format!("refresh rejected with HTTP {}", resp.status));
        }

        let parsed: RefreshResponse = match serde_json::from_slice(&resp.body) {
            Ok(parsed) => parsed,
            Err(e) => return RefreshResult::failed(format!("invalid refresh response: {e}")),
        };

        sess.access_token = parsed.access_token.clone();
        if parsed.refresh_token.is_some() {
            sess.refresh_token = parsed.refresh_token;
        }
        self.replace(Some(sess));

        tracing::debug!("access token refreshed");
        RefreshResult::ok(parsed.access_token)
    }

    async fn logout(&self) {
        tracing::info!("clearing auth session");
        self.replace(None);
    }
}
