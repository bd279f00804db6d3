//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// `min(max, 2^retry seconds + jitter)`, where jitter is uniform in
/// `[0, 1000)` milliseconds, drawn fresh on every call.
///
/// `retry` is the pre-increment failure count (0 for the first failure, so
/// the first backoff is `2^0 = 1` second); callers compute the backoff
/// before incrementing their own retry counter.
#[must_use]
pub fn calc_backoff(retry: u32, max: Duration) -> Duration {
    let exp_secs = 1u64.checked_shl(retry.min(63)).unwrap_or(u64::MAX);
    let base = Duration::from_secs(exp_secs);
    if base >= max {
        return max;
    }
    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
    (base + jitter).min(max)
}
