//! Fixed-window, per-path request budget. Over-budget requests are refused
//! immediately; nothing is queued.

use std::collections::HashMap;
use std::time::Duration;

use bazaar_shared::RateLimitStatus;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug)]
pub(crate) struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    windows: HashMap<String, Window>,
}

impl RateLimiter {
    pub(crate) fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            windows: HashMap::new(),
        }
    }

    /// Count one request against `path`. Returns `false` when the budget for
    /// the current window is spent.
    pub(crate) fn try_acquire(&mut self, path: &str, now: Instant) -> bool {
        let window = self.windows.entry(path.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.saturating_duration_since(window.started) > self.window {
            window.count = 0;
            window.started = now;
        }

        if window.count < self.max_per_window {
            window.count += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn status(&self, now: Instant) -> Vec<RateLimitStatus> {
        let mut statuses: Vec<_> = self
            .windows
            .iter()
            .map(|(path, window)| {
                let elapsed = now.saturating_duration_since(window.started);
                let (count, resets_in) = if elapsed > self.window {
                    (0, Duration::ZERO)
                } else {
                    (window.count, self.window - elapsed)
                };
                RateLimitStatus {
                    path: path.clone(),
                    count,
                    remaining: self.max_per_window.saturating_sub(count),
                    resets_in_ms: resets_in.as_millis() as u64,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.path.cmp(&b.path));
        statuses
    }
}
