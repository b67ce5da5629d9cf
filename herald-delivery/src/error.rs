//! Typed error handling for delivery operations.
//!
//! Delivery failures are split into:
//! - Permanent failures (rejected recipient or content) - retrying cannot help
//! - Temporary failures (timeouts, busy upstream) - retry later
//! - System errors - faults inside the process, treated as temporary by the queue

use thiserror::Error;

/// Top-level delivery error type, as reported by a transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that cannot succeed on retry.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that may succeed on a later attempt.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (I/O, internal errors, etc.).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient address is malformed or unknown upstream.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Content was refused (policy violation, spam filter, size).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The named template does not exist.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
}

/// Temporary errors that should be retried.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to reach the upstream service.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Upstream is temporarily busy or unavailable.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Upstream asked us to slow down.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The delivery did not settle within the dispatch timeout.
    #[error("Delivery timed out after {0} seconds")]
    Timeout(u64),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The transport panicked while delivering.
    #[error("Transport panicked: {0}")]
    TransportPanicked(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(error: std::io::Error) -> Self {
        Self::System(SystemError::Io(error))
    }
}

/// A notification request that can never be delivered, rejected at enqueue time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("A notification needs at least one recipient")]
    NoRecipients,

    #[error("Recipient {0} is blank")]
    BlankRecipient(usize),

    #[error("A notification needs a subject")]
    BlankSubject,

    #[error("Template name must not be blank")]
    BlankTemplate,
}

/// Invalid delivery configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("retry.max_retries must be at least 1")]
    ZeroMaxRetries,

    #[error("tick_interval_ms must be at least 1")]
    ZeroTickInterval,

    #[error("retry.retry_jitter_factor must be within [0, 1], got {0}")]
    JitterOutOfRange(f64),
}

/// Failures of a history store. Never reach the delivery pipeline.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("History store unavailable: {0}")]
    Unavailable(String),
}
