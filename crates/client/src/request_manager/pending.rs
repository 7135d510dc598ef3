//! In-flight request registry used for deduplication.

use std::collections::HashMap;
use std::time::Duration;

use bazaar_shared::ApiError;
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::time::Instant;

use super::RequestKey;

pub(crate) type SharedResponse = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

struct PendingRequest {
    id: u64,
    created: Instant,
    response: SharedResponse,
}

/// At most one entry per key. An entry leaves when its request settles or
/// when a lookup finds it older than `stale_after`.
pub(crate) struct PendingRequests {
    next_id: u64,
    stale_after: Duration,
    entries: HashMap<RequestKey, PendingRequest>,
}

impl PendingRequests {
    pub(crate) fn new(stale_after: Duration) -> Self {
        Self {
            next_id: 0,
            stale_after,
            entries: HashMap::new(),
        }
    }

    /// The in-flight response for `key`, unless there is none or it is stale.
    pub(crate) fn join(&mut self, key: &RequestKey, now: Instant) -> Option<SharedResponse> {
        let created = self.entries.get(key)?.created;
        if now.saturating_duration_since(created) >= self.stale_after {
            tracing::debug!(url = %key.url, "discarding stale pending request");
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.response.clone())
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn insert(&mut self, key: RequestKey, id: u64, now: Instant, response: SharedResponse) {
        self.entries.insert(
            key,
            PendingRequest {
                id,
                created: now,
                response,
            },
        );
    }

    /// Remove the entry only if it is still the one registered as `id`; a
    /// newer request for the same key may have replaced it.
    pub(crate) fn settle(&mut self, key: &RequestKey, id: u64) {
        if self.entries.get(key).is_some_and(|entry| entry.id == id) {
            self.entries.remove(key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
