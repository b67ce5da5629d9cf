//! Batch level rate limiting
//!
//! Throughput is capped at `rate_per_minute` messages by spacing whole
//! batches apart rather than metering individual messages:
//!
//! ```text
//! min_interval = 60s / (rate_per_minute / batch_size)
//!              = 60s * batch_size / rate_per_minute
//!
//! rate 60/min, batch 10 ──► one batch every 10s
//! ```
//!
//! The limiter does not read a clock itself. Callers pass `now`, and record
//! the start of a batch with [`RateLimiter::record_batch`] once they commit
//! to running it.

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_batch: Mutex<Option<SystemTime>>,
}

impl RateLimiter {
    /// Create a limiter for the given ceiling and batch size
    ///
    /// A `rate_per_minute` of zero disables throttling.
    #[must_use]
    pub fn new(rate_per_minute: u32, batch_size: usize) -> Self {
        Self {
            min_interval: min_interval(rate_per_minute, batch_size),
            last_batch: Mutex::new(None),
        }
    }

    /// Smallest gap allowed between the starts of two batches
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Check whether a batch may start at `now`
    ///
    /// A clock that went backwards since the last batch counts as no time
    /// having passed.
    pub fn allow_batch(&self, now: SystemTime) -> bool {
        let Some(last) = *self.last_batch.lock() else {
            return true;
        };

        let elapsed = now.duration_since(last).unwrap_or_default();
        let allowed = elapsed >= self.min_interval;

        if !allowed {
            trace!(
                elapsed_ms = elapsed.as_millis(),
                min_interval_ms = self.min_interval.as_millis(),
                "Batch rate limited"
            );
        }

        allowed
    }

    /// Record that a batch started at `now`
    pub fn record_batch(&self, now: SystemTime) {
        *self.last_batch.lock() = Some(now);
    }

    /// When the last batch started, if any has
    pub fn last_batch(&self) -> Option<SystemTime> {
        *self.last_batch.lock()
    }
}

fn min_interval(rate_per_minute: u32, batch_size: usize) -> Duration {
    if rate_per_minute == 0 {
        return Duration::ZERO;
    }

    let batch_size = u64::try_from(batch_size).unwrap_or(u64::MAX);
    let millis = 60_000u64.saturating_mul(batch_size) / u64::from(rate_per_minute);
    Duration::from_millis(millis)
}
