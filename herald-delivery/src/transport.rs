//! The seam between the queue and whatever actually sends a notification
//!
//! Rendering templates and talking to a mail server or API happen behind
//! [`Transport`]. The queue only cares whether a delivery worked and, if it
//! did not, whether trying again could help.

use std::fmt::Debug;

use async_trait::async_trait;
use herald_common::outgoing;

use crate::{error::DeliveryError, types::Message};

/// Performs the actual send of a single message
///
/// Implementations report ordinary failures through [`DeliveryError`] rather
/// than panicking. The processor bounds every call with its dispatch timeout
/// and treats a timeout, an error and a panic alike: as one failed attempt.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Deliver `message` to all of its recipients
    ///
    /// # Errors
    ///
    /// Returns a permanent error when retrying cannot help (bad recipient,
    /// rejected content), a temporary one otherwise.
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Transport that logs each message instead of sending it
///
/// Useful as a dry run and for development setups without a mail relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        let recipients = message
            .recipients
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        outgoing!(
            level = INFO,
            "[{}] {} -> {} (template: {})",
            message.id,
            message.subject,
            recipients,
            message.template.as_deref().unwrap_or("none")
        );

        Ok(())
    }
}
