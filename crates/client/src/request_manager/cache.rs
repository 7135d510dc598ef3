//! Short-lived response cache with lazy expiry.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use super::RequestKey;

/// TTL applied to URLs containing `pattern`. First match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtlRule {
    pub pattern: String,
    pub ttl: Duration,
}

impl CacheTtlRule {
    pub fn new(pattern: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            ttl,
        }
    }
}

pub fn default_ttl_rules() -> Vec<CacheTtlRule> {
    vec![
        CacheTtlRule::new("/feed", Duration::from_secs(30)),
        CacheTtlRule::new("/communities", Duration::from_secs(120)),
        CacheTtlRule::new("/profile", Duration::from_secs(300)),
        CacheTtlRule::new("/governance", Duration::from_secs(180)),
        CacheTtlRule::new("/marketplace", Duration::from_secs(60)),
    ]
}

pub fn ttl_for(url: &str, rules: &[CacheTtlRule], default: Duration) -> Duration {
    rules
        .iter()
        .find(|rule| url.contains(&rule.pattern))
        .map(|rule| rule.ttl)
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

/// Expired entries stay readable as stale fallbacks. They are only dropped
/// when a read finds them older than the stale horizon; nothing scans the map.
#[derive(Debug)]
pub(crate) struct ResponseCache {
    entries: HashMap<RequestKey, CacheEntry>,
    stale_horizon: Option<Duration>,
}

impl ResponseCache {
    pub(crate) fn new(stale_horizon: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            stale_horizon,
        }
    }

    pub(crate) fn get_fresh(&mut self, key: &RequestKey, now: Instant) -> Option<Value> {
        let entry = self.live_entry(key, now)?;
        if now.saturating_duration_since(entry.stored_at) < entry.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Any retained entry, regardless of TTL.
    pub(crate) fn get_stale(&mut self, key: &RequestKey, now: Instant) -> Option<Value> {
        self.live_entry(key, now).map(|entry| entry.value.clone())
    }

    pub(crate) fn insert(&mut self, key: RequestKey, value: Value, ttl: Duration, now: Instant) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                ttl,
            },
        );
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn live_entry(&mut self, key: &RequestKey, now: Instant) -> Option<&CacheEntry> {
        let past_horizon = match (self.entries.get(key), self.stale_horizon) {
            (Some(entry), Some(horizon)) => now.saturating_duration_since(entry.stored_at) >= horizon,
            (Some(_), None) => false,
            (None, _) => return None,
        };
        if past_horizon {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key)
    }
}
