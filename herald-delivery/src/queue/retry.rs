//! Retry backoff with jitter

use std::time::Duration;

use rand::Rng;

/// Calculate how long a retried message waits before it may be selected again
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
///
/// # Arguments
/// * `attempt` - The failed attempt number (1-indexed)
/// * `base_delay_secs` - Base delay in seconds, `0` retries on the next batch
/// * `max_delay_secs` - Upper bound in seconds
/// * `jitter_factor` - Jitter factor (e.g., 0.2 for ±20%)
pub fn backoff_delay(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_secs
    } else {
        base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(max_delay_secs)
    };

    if delay == 0 || jitter_factor <= 0.0 {
        return Duration::from_secs(delay);
    }

    #[allow(
        clippy::cast_precision_loss,
        reason = "Delays are far below the 2^52 second mark"
    )]
    let delay = delay as f64;
    let jitter_range = delay * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((delay + jitter).max(0.0))
}
