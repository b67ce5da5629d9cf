//! In-process notification delivery queue
//!
//! This crate provides functionality to:
//! - Accept notification requests and track them through their lifecycle
//! - Dispatch pending notifications in rate limited batches through a [`Transport`]
//! - Retry failed attempts up to a bounded budget, then report them as failed
//! - Record a best-effort delivery history
//! - Evict finished notifications after a retention window

mod clock;
mod config;
mod error;
pub mod history;
mod notification;
pub mod policy;
mod processor;
pub mod queue;
mod rate_limiter;
mod service;
mod transport;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DeliveryConfig;
pub use error::{
    ConfigError, DeliveryError, EnqueueError, HistoryError, PermanentError, SystemError,
    TemporaryError,
};
pub use history::{
    ChannelHistorySink, HistoryEvent, HistoryEventKind, HistorySink, HistoryStore,
    JsonLinesHistoryStore, MemoryHistoryStore, NoopHistorySink,
};
pub use notification::Notification;
pub use policy::{RetryDecision, RetryPolicy};
pub use processor::{BatchReport, DeliveryProcessor, TickOutcome};
pub use queue::DeliveryQueue;
pub use rate_limiter::RateLimiter;
pub use service::NotificationService;
pub use transport::{LogTransport, Transport};
pub use types::{
    DeliveryStatus, Message, MessageId, Payload, QueueStats, Recipient, UnknownStatus,
};
