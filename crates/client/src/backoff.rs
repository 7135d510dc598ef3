//! Backoff formulas shared by the retry loops and the polling timer.

use std::time::Duration;

/// Exponents above this are clamped; the caps below are hit long before.
const MAX_EXPONENT: u32 = 16;

/// `base × 2^attempt`.
pub fn exponential(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_EXPONENT))
}

/// Delay before retrying after a 503: `min(10s × 2^attempt, 60s)`.
pub fn service_unavailable(attempt: u32) -> Duration {
    exponential(Duration::from_secs(10), attempt).min(Duration::from_secs(60))
}

/// Delay before the fetch wrapper's next network retry: `1s × 2^(attempt − 1)`
/// for the 1-based retry number.
pub fn network_retry(retry: u32) -> Duration {
    exponential(Duration::from_secs(1), retry.saturating_sub(1))
}

/// `min(base × factor^failures, max)`.
pub fn scaled(base: Duration, factor: f64, failures: u32, max: Duration) -> Duration {
    let millis = base.as_millis() as f64 * factor.powi(failures.min(64) as i32);
    if !millis.is_finite() || millis >= max.as_millis() as f64 {
        return max;
    }
    Duration::from_millis(millis as u64).min(max)
}
