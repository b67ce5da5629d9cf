//! Delivery queue management
//!
//! The queue owns every notification the process knows about, keyed by
//! [`MessageId`]. Each state transition re-checks the current status under the
//! entry lock, so a transition that is not valid for the message's state is a
//! no-op rather than a corruption.

pub mod cleanup;
pub mod retry;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use tracing::warn;

use crate::{
    policy::RetryDecision,
    types::{DeliveryStatus, Message, MessageId, Payload, QueueStats, Recipient},
};

/// Manages the set of queued notifications
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueue {
    /// Map of message IDs to messages (lock-free concurrent access)
    pub(crate) queue: Arc<DashMap<MessageId, Message>>,
    sequence: Arc<AtomicU64>,
}

impl DeliveryQueue {
    /// Create a new empty delivery queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new `Pending` message and return it
    ///
    /// Input is not validated here; see [`crate::NotificationService::enqueue`].
    pub fn push(
        &self,
        recipients: Vec<Recipient>,
        subject: &str,
        payload: Payload,
        template: Option<&str>,
        now: SystemTime,
    ) -> Message {
        let message = Message {
            id: MessageId::generate(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            recipients: recipients.into(),
            subject: Arc::from(subject),
            payload: Arc::new(payload),
            template: template.map(Arc::from),
            attempt_count: 0,
            status: DeliveryStatus::Pending,
            created_at: now,
            processed_at: None,
            last_error: None,
            not_before: None,
        };

        self.queue.insert(message.id, message.clone());
        message
    }

    /// Get a snapshot of a message
    pub fn get(&self, message_id: &MessageId) -> Option<Message> {
        self.queue
            .get(message_id)
            .map(|entry| entry.value().clone())
    }

    /// All messages in the given state, in enqueue order
    pub fn list_by_status(&self, status: DeliveryStatus) -> Vec<Message> {
        let mut messages: Vec<_> = self
            .queue
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect();

        messages.sort_unstable_by_key(|message| message.sequence);
        messages
    }

    /// All messages, in enqueue order
    pub fn all_messages(&self) -> Vec<Message> {
        let mut messages: Vec<_> = self
            .queue
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        messages.sort_unstable_by_key(|message| message.sequence);
        messages
    }

    /// Count messages by state
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();

        for entry in self.queue.iter() {
            stats.count(entry.value().status);
        }

        stats
    }

    /// Get the number of messages in the queue
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Select up to `limit` ready messages in enqueue order and mark them `InFlight`
    ///
    /// Returns snapshots of the claimed messages. A message that stopped being
    /// ready between selection and claiming (an operator cleared it, say) is
    /// skipped.
    pub fn claim_batch(&self, limit: usize, now: SystemTime) -> Vec<Message> {
        let mut candidates: Vec<(u64, MessageId)> = self
            .queue
            .iter()
            .filter(|entry| entry.value().is_ready(now))
            .map(|entry| (entry.value().sequence, *entry.key()))
            .collect();

        candidates.sort_unstable();

        let mut claimed = Vec::with_capacity(limit.min(candidates.len()));

        for (_, message_id) in candidates {
            if claimed.len() >= limit {
                break;
            }

            if let Some(mut entry) = self.queue.get_mut(&message_id)
                && entry.is_ready(now)
            {
                entry.status = DeliveryStatus::InFlight;
                claimed.push(entry.value().clone());
            }
        }

        claimed
    }

    /// `InFlight` -> `Sent`
    ///
    /// Returns `false` if the message is gone or was not in flight.
    pub fn mark_sent(&self, message_id: &MessageId, now: SystemTime) -> bool {
        let Some(mut entry) = self.queue.get_mut(message_id) else {
            return false;
        };

        if entry.status != DeliveryStatus::InFlight {
            warn!(
                message_id = %message_id,
                status = %entry.status,
                "Ignoring delivery success for message that is not in flight"
            );
            return false;
        }

        entry.status = DeliveryStatus::Sent;
        entry.processed_at = Some(now);
        entry.not_before = None;
        true
    }

    /// `InFlight` -> `Pending` or `Failed`, as decided by the retry policy
    ///
    /// Returns the updated message, or `None` if the message is gone or was
    /// not in flight.
    pub fn apply_failure(
        &self,
        message_id: &MessageId,
        decision: RetryDecision,
        reason: String,
        now: SystemTime,
    ) -> Option<Message> {
        let mut entry = self.queue.get_mut(message_id)?;

        if entry.status != DeliveryStatus::InFlight {
            warn!(
                message_id = %message_id,
                status = %entry.status,
                "Ignoring delivery failure for message that is not in flight"
            );
            return None;
        }

        entry.attempt_count = decision.attempt_count();
        entry.last_error = Some(reason);

        match decision {
            RetryDecision::Retry { not_before, .. } => {
                entry.status = DeliveryStatus::Pending;
                entry.not_before = not_before;
            }
            RetryDecision::Fail { .. } => {
                entry.status = DeliveryStatus::Failed;
                entry.processed_at = Some(now);
                entry.not_before = None;
            }
        }

        Some(entry.value().clone())
    }

    /// Reset a `Failed` message to `Pending` with a fresh retry budget
    ///
    /// No-op returning `false` for any other state or an unknown ID.
    pub fn retry_one(&self, message_id: &MessageId) -> bool {
        self.queue
            .get_mut(message_id)
            .is_some_and(|mut entry| entry.value_mut().reset_for_retry())
    }

    /// Reset every `Failed` message, returning how many were reset
    pub fn retry_all_failed(&self) -> usize {
        let mut reset = 0;

        for mut entry in self.queue.iter_mut() {
            if entry.value_mut().reset_for_retry() {
                reset += 1;
            }
        }

        reset
    }

    /// Drop every `Failed` message without retrying it
    pub fn clear_failed(&self) -> usize {
        let mut cleared = 0;

        self.queue.retain(|_, message| {
            let keep = message.status != DeliveryStatus::Failed;
            if !keep {
                cleared += 1;
            }
            keep
        });

        cleared
    }

    /// Return every `InFlight` message to `Pending`
    ///
    /// Used when a dispatch pass is abandoned before its deliveries settled.
    pub fn release_in_flight(&self) -> usize {
        let mut released = 0;

        for mut entry in self.queue.iter_mut() {
            if entry.status == DeliveryStatus::InFlight {
                entry.status = DeliveryStatus::Pending;
                released += 1;
            }
        }

        released
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn push(queue: &DeliveryQueue, subject: &str, now: SystemTime) -> MessageId {
        queue
            .push(
                vec![Recipient::new("reader@example.com")],
                subject,
                Payload::Raw("body".to_string()),
                None,
                now,
            )
            .id
    }

    fn fail(queue: &DeliveryQueue, id: &MessageId, attempts: u32, now: SystemTime) {
        queue.claim_batch(usize::MAX, now);
        queue.apply_failure(
            id,
            RetryDecision::Fail {
                attempt_count: attempts,
            },
            "boom".to_string(),
            now,
        );
    }

    #[test]
    fn test_push_starts_pending() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let id = push(&queue, "Welcome", now);

        let message = queue.get(&id).unwrap();
        assert_eq!(message.status, DeliveryStatus::Pending);
        assert_eq!(message.attempt_count, 0);
        assert_eq!(message.created_at, now);
        assert!(message.processed_at.is_none());
        assert!(message.last_error.is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_claim_batch_respects_order_and_limit() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let ids: Vec<_> = (0..5).map(|i| push(&queue, &format!("m{i}"), now)).collect();

        let batch = queue.claim_batch(3, now);
        let claimed: Vec<_> = batch.iter().map(|m| m.id).collect();
        assert_eq!(claimed, ids[..3]);
        assert!(batch.iter().all(|m| m.status == DeliveryStatus::InFlight));

        // A second claim cannot pick the in-flight messages again
        let batch = queue.claim_batch(10, now);
        let claimed: Vec<_> = batch.iter().map(|m| m.id).collect();
        assert_eq!(claimed, ids[3..]);

        assert!(queue.claim_batch(10, now).is_empty());
        assert_eq!(queue.stats().processing, 5);
    }

    #[test]
    fn test_claim_batch_skips_messages_backing_off() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let id = push(&queue, "Digest", now);

        queue.claim_batch(1, now);
        queue.apply_failure(
            &id,
            RetryDecision::Retry {
                attempt_count: 1,
                not_before: Some(now + Duration::from_secs(60)),
            },
            "busy".to_string(),
            now,
        );

        assert!(queue.claim_batch(1, now).is_empty());
        assert_eq!(queue.claim_batch(1, now + Duration::from_secs(60)).len(), 1);
    }

    #[test]
    fn test_mark_sent_only_from_in_flight() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let id = push(&queue, "Alert", now);

        assert!(!queue.mark_sent(&id, now));
        assert_eq!(queue.get(&id).unwrap().status, DeliveryStatus::Pending);

        queue.claim_batch(1, now);
        assert!(queue.mark_sent(&id, now));

        let message = queue.get(&id).unwrap();
        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(message.processed_at, Some(now));

        // Sent is never left
        assert!(!queue.mark_sent(&id, now));
        assert!(
            queue
                .apply_failure(
                    &id,
                    RetryDecision::Fail { attempt_count: 1 },
                    "late".to_string(),
                    now
                )
                .is_none()
        );
        assert!(!queue.retry_one(&id));
        assert_eq!(queue.get(&id).unwrap().status, DeliveryStatus::Sent);
    }

    #[test]
    fn test_apply_failure_retry_and_fail() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let id = push(&queue, "Alert", now);

        queue.claim_batch(1, now);
        let message = queue
            .apply_failure(
                &id,
                RetryDecision::Retry {
                    attempt_count: 1,
                    not_before: None,
                },
                "timeout".to_string(),
                now,
            )
            .unwrap();
        assert_eq!(message.status, DeliveryStatus::Pending);
        assert_eq!(message.attempt_count, 1);
        assert_eq!(message.last_error.as_deref(), Some("timeout"));
        assert!(message.processed_at.is_none());

        queue.claim_batch(1, now);
        let message = queue
            .apply_failure(
                &id,
                RetryDecision::Fail { attempt_count: 2 },
                "timeout again".to_string(),
                now,
            )
            .unwrap();
        assert_eq!(message.status, DeliveryStatus::Failed);
        assert_eq!(message.attempt_count, 2);
        assert_eq!(message.processed_at, Some(now));
        assert_eq!(message.last_error.as_deref(), Some("timeout again"));
    }

    #[test]
    fn test_retry_one_is_idempotent() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let id = push(&queue, "Alert", now);
        fail(&queue, &id, 3, now);

        assert!(queue.retry_one(&id));
        let first = queue.get(&id).unwrap();
        assert!(!queue.retry_one(&id));
        let second = queue.get(&id).unwrap();

        for message in [first, second] {
            assert_eq!(message.status, DeliveryStatus::Pending);
            assert_eq!(message.attempt_count, 0);
            assert!(message.last_error.is_none());
            assert!(message.processed_at.is_none());
        }
    }

    #[test]
    fn test_retry_one_ignores_non_failed() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let pending = push(&queue, "pending", now);
        let in_flight = push(&queue, "in flight", now);

        queue.claim_batch(usize::MAX, now);
        queue.apply_failure(
            &pending,
            RetryDecision::Retry {
                attempt_count: 1,
                not_before: None,
            },
            "busy".to_string(),
            now,
        );

        let before_pending = queue.get(&pending).unwrap();
        let before_in_flight = queue.get(&in_flight).unwrap();

        assert!(!queue.retry_one(&pending));
        assert!(!queue.retry_one(&in_flight));
        assert!(!queue.retry_one(&MessageId::generate()));

        let after_pending = queue.get(&pending).unwrap();
        let after_in_flight = queue.get(&in_flight).unwrap();
        assert_eq!(after_pending.status, before_pending.status);
        assert_eq!(after_pending.attempt_count, 1);
        assert_eq!(after_pending.last_error, before_pending.last_error);
        assert_eq!(after_in_flight.status, before_in_flight.status);
    }

    #[test]
    fn test_retry_all_failed_leaves_sent_alone() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let a = push(&queue, "a", now);
        let b = push(&queue, "b", now);
        let c = push(&queue, "c", now);

        queue.claim_batch(usize::MAX, now);
        for id in [&a, &b] {
            queue.apply_failure(
                id,
                RetryDecision::Fail { attempt_count: 3 },
                "rejected".to_string(),
                now,
            );
        }
        queue.mark_sent(&c, now);

        assert_eq!(queue.retry_all_failed(), 2);

        for id in [&a, &b] {
            let message = queue.get(id).unwrap();
            assert_eq!(message.status, DeliveryStatus::Pending);
            assert_eq!(message.attempt_count, 0);
        }
        let sent = queue.get(&c).unwrap();
        assert_eq!(sent.status, DeliveryStatus::Sent);
        assert_eq!(sent.processed_at, Some(now));

        assert_eq!(queue.retry_all_failed(), 0);
    }

    #[test]
    fn test_clear_failed() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let failed = push(&queue, "failed", now);
        fail(&queue, &failed, 3, now);
        let pending = push(&queue, "pending", now);

        assert_eq!(queue.clear_failed(), 1);
        assert!(queue.get(&failed).is_none());
        assert!(queue.get(&pending).is_some());
        assert_eq!(queue.clear_failed(), 0);
    }

    #[test]
    fn test_stats_and_listing() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        let a = push(&queue, "a", now);
        let b = push(&queue, "b", now);
        let c = push(&queue, "c", now);
        let _d = push(&queue, "d", now);

        queue.claim_batch(3, now);
        queue.mark_sent(&a, now);
        queue.apply_failure(
            &b,
            RetryDecision::Fail { attempt_count: 3 },
            "nope".to_string(),
            now,
        );

        let stats = queue.stats();
        assert_eq!(
            stats,
            QueueStats {
                total: 4,
                pending: 1,
                processing: 1,
                sent: 1,
                failed: 1,
            }
        );

        let in_flight: Vec<_> = queue
            .list_by_status(DeliveryStatus::InFlight)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(in_flight, vec![c]);
        assert_eq!(queue.all_messages().len(), 4);
    }

    #[test]
    fn test_release_in_flight() {
        let queue = DeliveryQueue::new();
        let now = SystemTime::now();
        push(&queue, "a", now);
        push(&queue, "b", now);

        queue.claim_batch(usize::MAX, now);
        assert_eq!(queue.release_in_flight(), 2);
        assert_eq!(queue.stats().pending, 2);
        assert_eq!(queue.release_in_flight(), 0);
    }
}
