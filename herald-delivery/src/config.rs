//! Delivery processor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, policy::RetryPolicy};

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_batch_size() -> usize {
    10
}

const fn default_rate_per_minute() -> u32 {
    60
}

const fn default_retention_secs() -> u64 {
    3600 // 1 hour
}

const fn default_dispatch_timeout_secs() -> u64 {
    30
}

/// Tunables of the batch scheduler
///
/// Every field has a default, so an empty `()` in a RON file is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How often the scheduler wakes up (in milliseconds)
    ///
    /// Default: 1000
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum number of messages dispatched per pass
    ///
    /// Default: 10
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Messages allowed per minute, enforced per batch. Zero disables throttling.
    ///
    /// Default: 60
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: u32,

    /// How long `Sent` and `Failed` messages stay visible (in seconds)
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Upper bound on a single transport call (in seconds)
    ///
    /// Default: 30
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_batch_size(),
            rate_per_minute: default_rate_per_minute(),
            retention_secs: default_retention_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DeliveryConfig {
    /// Reject settings the scheduler cannot run with
    ///
    /// # Errors
    ///
    /// The first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::ZeroMaxRetries);
        }

        if !(0.0..=1.0).contains(&self.retry.retry_jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.retry.retry_jitter_factor));
        }

        Ok(())
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}
