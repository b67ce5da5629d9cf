//! Retry policy for failed delivery attempts.
//!
//! Decides, for each failed attempt, whether the message goes back to the
//! pending pool or becomes terminally failed. This is the only place the
//! attempt counter is advanced.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{error::DeliveryError, queue::retry::backoff_delay};

/// Retry policy configuration for delivery attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of failed attempts after which a message is marked failed.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay before a retried message is eligible again (in seconds).
    ///
    /// The actual delay is `base * 2^(attempts - 1)`. Zero makes a retried
    /// message eligible for the very next batch.
    ///
    /// Default: 0
    #[serde(default)]
    pub base_retry_delay_secs: u64,

    /// Maximum retry delay (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Jitter factor for randomizing retry delays, within `[0, 1]`.
    ///
    /// Default: 0.0
    #[serde(default)]
    pub retry_jitter_factor: f64,

    /// Mark a message failed on the first permanent error instead of spending
    /// the rest of its retry budget.
    ///
    /// Default: `false`
    #[serde(default)]
    pub fail_fast_on_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_retry_delay_secs: 0,
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: 0.0,
            fail_fast_on_permanent: false,
        }
    }
}

/// What happens to a message after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `Pending`, selectable again from `not_before` (or immediately)
    Retry {
        attempt_count: u32,
        not_before: Option<SystemTime>,
    },
    /// Terminally `Failed`
    Fail { attempt_count: u32 },
}

impl RetryDecision {
    #[must_use]
    pub const fn attempt_count(self) -> u32 {
        match self {
            Self::Retry { attempt_count, .. } | Self::Fail { attempt_count } => attempt_count,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with the given budget and otherwise default values.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Decide the next state for a message whose attempt just failed.
    ///
    /// `attempt_count` is the count *before* this failure.
    #[must_use]
    pub fn on_failure(
        &self,
        attempt_count: u32,
        error: &DeliveryError,
        now: SystemTime,
    ) -> RetryDecision {
        let attempt_count = attempt_count.saturating_add(1);

        if attempt_count >= self.max_retries || (self.fail_fast_on_permanent && error.is_permanent())
        {
            return RetryDecision::Fail { attempt_count };
        }

        let delay = backoff_delay(
            attempt_count,
            self.base_retry_delay_secs,
            self.max_retry_delay_secs,
            self.retry_jitter_factor,
        );

        RetryDecision::Retry {
            attempt_count,
            not_before: (!delay.is_zero()).then(|| now + delay),
        }
    }

    /// Get the number of remaining attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_retries.saturating_sub(attempt_count)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn max_retry_delay_secs() -> u64 {
        3600 // 1 hour
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::{PermanentError, TemporaryError};

    fn temporary() -> DeliveryError {
        TemporaryError::Unavailable("503".to_string()).into()
    }

    fn permanent() -> DeliveryError {
        PermanentError::InvalidRecipient("nobody".to_string()).into()
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_retry_delay_secs, 0);
        assert_eq!(policy.max_retry_delay_secs, 3600);
        assert!(policy.retry_jitter_factor.abs() < f64::EPSILON);
        assert!(!policy.fail_fast_on_permanent);
    }

    #[test]
    fn test_retries_until_budget_is_spent() {
        let policy = RetryPolicy::with_max_retries(3);
        let now = SystemTime::now();

        assert_eq!(
            policy.on_failure(0, &temporary(), now),
            RetryDecision::Retry {
                attempt_count: 1,
                not_before: None
            }
        );
        assert_eq!(
            policy.on_failure(1, &temporary(), now),
            RetryDecision::Retry {
                attempt_count: 2,
                not_before: None
            }
        );
        assert_eq!(
            policy.on_failure(2, &temporary(), now),
            RetryDecision::Fail { attempt_count: 3 }
        );
    }

    #[test]
    fn test_permanent_errors_spend_the_budget_by_default() {
        let policy = RetryPolicy::with_max_retries(3);
        let decision = policy.on_failure(0, &permanent(), SystemTime::now());
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[test]
    fn test_fail_fast_on_permanent() {
        let policy = RetryPolicy {
            fail_fast_on_permanent: true,
            ..RetryPolicy::with_max_retries(5)
        };
        let now = SystemTime::now();

        assert_eq!(
            policy.on_failure(0, &permanent(), now),
            RetryDecision::Fail { attempt_count: 1 }
        );
        assert!(matches!(
            policy.on_failure(0, &temporary(), now),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_backoff_sets_not_before() {
        let policy = RetryPolicy {
            base_retry_delay_secs: 60,
            ..RetryPolicy::with_max_retries(5)
        };
        let now = SystemTime::now();

        assert_eq!(
            policy.on_failure(1, &temporary(), now),
            RetryDecision::Retry {
                attempt_count: 2,
                not_before: Some(now + Duration::from_secs(120))
            }
        );
    }

    #[test]
    fn test_remaining_attempts() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.remaining_attempts(0), 3);
        assert_eq!(policy.remaining_attempts(2), 1);
        assert_eq!(policy.remaining_attempts(3), 0);
        assert_eq!(policy.remaining_attempts(30), 0);
    }
}
