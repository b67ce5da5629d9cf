//! A single bounded delivery attempt

use std::{any::Any, panic::AssertUnwindSafe, time::Duration};

use futures_util::FutureExt;

use crate::{
    error::{DeliveryError, SystemError, TemporaryError},
    transport::Transport,
    types::Message,
};

/// Hand `message` to `transport`, bounded by `timeout`
///
/// Timeouts and panics come back as errors like any other failure, so the
/// caller applies the retry policy uniformly.
pub async fn attempt(
    transport: &dyn Transport,
    message: &Message,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let delivery = AssertUnwindSafe(transport.deliver(message)).catch_unwind();

    match tokio::time::timeout(timeout, delivery).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(SystemError::TransportPanicked(panic_message(panic.as_ref())).into()),
        Err(_) => Err(TemporaryError::Timeout(timeout.as_secs()).into()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
