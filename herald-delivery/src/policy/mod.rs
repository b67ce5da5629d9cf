//! Policy abstractions for delivery operations.
//!
//! - [`RetryPolicy`]: what happens to a message after a failed attempt

pub mod retry;

pub use retry::{RetryDecision, RetryPolicy};
