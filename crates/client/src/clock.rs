//! Time source used by retry loops, caches and the polling timer.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Injectable clock. Backoff delays and freshness checks go through this so
/// they can be observed in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer (honours `tokio::time::pause`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
