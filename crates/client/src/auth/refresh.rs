//! Single-flight token refresh with a queue of requests parked behind it.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use bazaar_shared::ApiError;
use futures_channel::oneshot;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use super::AuthService;
use crate::fetch::{FetchOptions, FetchResponse};
use crate::lock;

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// A request that hit 401/403 while a refresh was already running.
pub struct QueuedRequest {
    /// Fully resolved URL, so any client sharing the coordinator can replay it
    pub url: String,
    pub options: FetchOptions,
    reply: oneshot::Sender<Result<FetchResponse, ApiError>>,
}

impl QueuedRequest {
    /// Settle the parked caller with the replayed response.
    pub fn resolve(self, response: FetchResponse) {
        let _ = self.reply.send(Ok(response));
    }

    pub fn reject(self, error: ApiError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Re-issues parked requests once a fresh token exists.
///
/// Implementations must not wait for the replay to finish: each queued caller
/// is settled independently.
pub trait RequestReplayer: Send + Sync {
    fn replay(&self, request: QueuedRequest);
}

/// What a caller that received 401/403 should do next.
pub enum Recovery {
    /// A refresh was already running; the caller is parked and will be settled
    /// by the drain step.
    Queued(oneshot::Receiver<Result<FetchResponse, ApiError>>),
    /// This caller started or joined a refresh that has now settled.
    Refreshed(bool),
}

#[derive(Default)]
struct RefreshState {
    /// `Some` exactly while a refresh is running.
    in_flight: Option<RefreshFuture>,
    queue: VecDeque<QueuedRequest>,
}

/// Owns the "refresh in flight" lock and the queue of requests blocked on it.
///
/// One instance per auth session; inject it into every [`crate::FetchClient`]
/// that shares the session.
pub struct TokenRefreshCoordinator {
    auth: Arc<dyn AuthService>,
    state: Arc<Mutex<RefreshState>>,
}

impl TokenRefreshCoordinator {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        Self {
            auth,
            state: Arc::new(Mutex::new(RefreshState::default())),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Refresh the token, or join the refresh already in flight.
    pub async fn ensure_fresh_token(&self, replayer: Arc<dyn RequestReplayer>) -> bool {
        let refresh = {
            let mut state = lock(&self.state);
            self.start_or_join(&mut state, replayer)
        };
        refresh.await
    }

    /// Called by a request that received 401/403. Parks it if a refresh is
    /// running, otherwise starts one. Check and set happen under one lock.
    pub async fn recover(
        &self,
        url: &str,
        options: &FetchOptions,
        replayer: Arc<dyn RequestReplayer>,
    ) -> Recovery {
        let refresh = {
            let mut state = lock(&self.state);
            if state.in_flight.is_some() {
                let (reply, rx) = oneshot::channel();
                state.queue.push_back(QueuedRequest {
                    url: url.to_string(),
                    options: options.clone(),
                    reply,
                });
                tracing::debug!(%url, queued = state.queue.len(), "parked request behind token refresh");
                return Recovery::Queued(rx);
            }
            self.start_or_join(&mut state, replayer)
        };
        Recovery::Refreshed(refresh.await)
    }

    fn start_or_join(
        &self,
        state: &mut RefreshState,
        replayer: Arc<dyn RequestReplayer>,
    ) -> RefreshFuture {
        if let Some(existing) = &state.in_flight {
            return existing.clone();
        }

        tracing::info!("starting token refresh");
        let task = tokio::spawn(run_refresh(self.auth.clone(), self.state.clone(), replayer));
        let refresh = async move { task.await.unwrap_or(false) }.boxed().shared();
        state.in_flight = Some(refresh.clone());
        refresh
    }
}

/// Runs detached so the lock is always released, even when every caller that
/// was awaiting the refresh has gone away.
async fn run_refresh(
    auth: Arc<dyn AuthService>,
    state: Arc<Mutex<RefreshState>>,
    replayer: Arc<dyn RequestReplayer>,
) -> bool {
    let outcome = AssertUnwindSafe(auth.refresh_token()).catch_unwind().await;
    let failure = match outcome {
        Ok(result) if result.success => None,
        Ok(result) => Some(result.error.unwrap_or_else(|| "refresh rejected".to_string())),
        Err(_) => Some("refresh panicked".to_string()),
    };

    // Clearing the lock and taking the queue is one step: anything that
    // arrives afterwards starts a new refresh instead of waiting forever.
    let queued = {
        let mut state = lock(&state);
        state.in_flight = None;
        std::mem::take(&mut state.queue)
    };

    match failure {
        None => {
            tracing::info!(queued = queued.len(), "token refreshed, replaying parked requests");
            for request in queued {
                replayer.replay(request);
            }
            true
        }
        Some(reason) => {
            tracing::warn!(queued = queued.len(), %reason, "token refresh failed, ending session");
            for request in queued {
                request.reject(ApiError::TokenRefreshFailed(reason.clone()));
            }
            auth.logout().await;
            false
        }
    }
}
