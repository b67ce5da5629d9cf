//! Service trait abstraction for queue operations
//!
//! Producers and the control socket depend on [`NotificationService`] rather
//! than on the concrete [`DeliveryProcessor`], which keeps them mockable.

use herald_common::tracing::{debug, info};

use crate::{
    error::EnqueueError,
    history::{HistoryEvent, HistoryEventKind},
    notification::Notification,
    processor::DeliveryProcessor,
    types::{DeliveryStatus, Message, MessageId, Payload, QueueStats, Recipient},
};

/// Enqueueing and operator actions on the notification queue
pub trait NotificationService: Send + Sync {
    /// Accept a notification for delivery
    ///
    /// Never blocks on I/O. The message starts `Pending` and is picked up by a
    /// later scheduler pass.
    ///
    /// # Errors
    ///
    /// If the request could never be delivered: no recipients, a blank
    /// recipient or subject, or a blank template name.
    fn enqueue(
        &self,
        recipients: Vec<Recipient>,
        subject: &str,
        payload: Payload,
        template: Option<&str>,
    ) -> Result<MessageId, EnqueueError>;

    /// Enqueue one of the prepared [`Notification`]s
    ///
    /// # Errors
    ///
    /// See [`Self::enqueue`].
    fn send(&self, notification: Notification) -> Result<MessageId, EnqueueError> {
        self.enqueue(
            notification.recipients,
            &notification.subject,
            notification.payload,
            notification.template.as_deref(),
        )
    }

    /// Get a snapshot of a message
    ///
    /// Returns `None` if the message is unknown or was already evicted.
    fn get(&self, id: &MessageId) -> Option<Message>;

    /// List messages in the given state, in enqueue order
    fn list_by_status(&self, status: DeliveryStatus) -> Vec<Message>;

    fn stats(&self) -> QueueStats;

    /// Reset a `Failed` message to `Pending` with a fresh retry budget
    ///
    /// Returns `false`, changing nothing, for any other state.
    fn retry_one(&self, id: &MessageId) -> bool;

    /// Reset every `Failed` message, returning how many were reset
    fn retry_all_failed(&self) -> usize;

    /// Remove every `Failed` message, returning how many were removed
    fn clear_failed(&self) -> usize;
}

fn validate(
    recipients: &[Recipient],
    subject: &str,
    template: Option<&str>,
) -> Result<(), EnqueueError> {
    if recipients.is_empty() {
        return Err(EnqueueError::NoRecipients);
    }

    if let Some(index) = recipients
        .iter()
        .position(|recipient| recipient.as_str().trim().is_empty())
    {
        return Err(EnqueueError::BlankRecipient(index));
    }

    if subject.trim().is_empty() {
        return Err(EnqueueError::BlankSubject);
    }

    if template.is_some_and(|template| template.trim().is_empty()) {
        return Err(EnqueueError::BlankTemplate);
    }

    Ok(())
}

impl NotificationService for DeliveryProcessor {
    fn enqueue(
        &self,
        recipients: Vec<Recipient>,
        subject: &str,
        payload: Payload,
        template: Option<&str>,
    ) -> Result<MessageId, EnqueueError> {
        validate(&recipients, subject, template)?;

        let now = self.clock.now();
        let message = self.queue.push(recipients, subject, payload, template, now);

        debug!(
            message_id = %message.id,
            recipients = message.recipients.len(),
            template = message.template.as_deref().unwrap_or("none"),
            "Notification queued"
        );
        self.history
            .record(HistoryEvent::new(HistoryEventKind::Queued, &message, now));

        Ok(message.id)
    }

    fn get(&self, id: &MessageId) -> Option<Message> {
        self.queue.get(id)
    }

    fn list_by_status(&self, status: DeliveryStatus) -> Vec<Message> {
        self.queue.list_by_status(status)
    }

    fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    fn retry_one(&self, id: &MessageId) -> bool {
        let reset = self.queue.retry_one(id);

        if reset {
            info!(message_id = %id, "Failed notification queued for retry");
        }

        reset
    }

    fn retry_all_failed(&self) -> usize {
        let reset = self.queue.retry_all_failed();
        info!(count = reset, "Failed notifications queued for retry");
        reset
    }

    fn clear_failed(&self) -> usize {
        let cleared = self.queue.clear_failed();
        info!(count = cleared, "Failed notifications cleared");
        cleared
    }
}
