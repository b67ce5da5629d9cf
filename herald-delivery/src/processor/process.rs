//! One scheduler pass: claim a batch, dispatch it, settle the outcomes

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use herald_common::tracing::{debug, error, warn};
use tokio::task::JoinSet;

use crate::{
    error::{DeliveryError, SystemError},
    history::{HistoryEvent, HistoryEventKind},
    policy::RetryDecision,
    processor::{DeliveryProcessor, delivery::attempt},
    queue::DeliveryQueue,
    types::{Message, MessageId},
};

/// What a call to [`DeliveryProcessor::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another pass was still running
    Busy,
    /// The previous batch started too recently
    RateLimited,
    /// Nothing was ready to send
    Idle,
    Dispatched(BatchReport),
}

/// Per-pass counts of delivery outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    /// Failed attempts that went back to `Pending`
    pub retried: usize,
    /// Failed attempts that exhausted the retry budget
    pub failed: usize,
}

impl BatchReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.sent + self.retried + self.failed
    }
}

/// Single-flight guard for a pass
///
/// Clears the processing flag when dropped. If the pass is dropped before its
/// deliveries settled (the future was cancelled), the claimed messages go back
/// to `Pending` so a later pass picks them up.
struct PassGuard<'a> {
    processing: &'a AtomicBool,
    queue: &'a DeliveryQueue,
    settled: bool,
}

impl<'a> PassGuard<'a> {
    fn acquire(processing: &'a AtomicBool, queue: &'a DeliveryQueue) -> Option<Self> {
        processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                processing,
                queue,
                settled: false,
            })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let released = self.queue.release_in_flight();
            if released > 0 {
                warn!(released, "Delivery pass abandoned, returned messages to pending");
            }
        }

        self.processing.store(false, Ordering::Release);
    }
}

impl DeliveryProcessor {
    /// Run a single scheduler pass
    ///
    /// At most one pass runs at a time; an overlapping call returns
    /// [`TickOutcome::Busy`] without touching the queue. Terminal messages past
    /// the retention window are evicted on every pass that gets the guard.
    pub async fn tick(&self) -> TickOutcome {
        let Some(mut guard) = PassGuard::acquire(&self.processing, &self.queue) else {
            debug!("Delivery pass already running");
            return TickOutcome::Busy;
        };

        let now = self.clock.now();

        if !self.rate_limiter.allow_batch(now) {
            guard.settled = true;
            return TickOutcome::RateLimited;
        }

        let batch = self.queue.claim_batch(self.config.batch_size, now);

        if batch.is_empty() {
            self.evict_expired(now);
            guard.settled = true;
            return TickOutcome::Idle;
        }

        self.rate_limiter.record_batch(now);

        debug!(batch_size = batch.len(), "Dispatching delivery batch");
        let report = self.dispatch(batch).await;

        self.evict_expired(self.clock.now());
        guard.settled = true;

        TickOutcome::Dispatched(report)
    }

    /// Deliver every message of `batch` concurrently and apply the outcomes
    async fn dispatch(&self, batch: Vec<Message>) -> BatchReport {
        let timeout = self.config.dispatch_timeout();
        let mut unsettled: HashMap<MessageId, u32> = batch
            .iter()
            .map(|message| (message.id, message.attempt_count))
            .collect();
        let mut join_set = JoinSet::new();

        for message in batch {
            let transport = Arc::clone(&self.transport);

            join_set.spawn(async move {
                let outcome = attempt(transport.as_ref(), &message, timeout).await;
                (message, outcome)
            });
        }

        let mut report = BatchReport::default();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((message, outcome)) => {
                    unsettled.remove(&message.id);
                    self.settle(&message.id, message.attempt_count, outcome, &mut report);
                }
                Err(e) => {
                    error!("Delivery task did not complete: {e}");
                }
            }
        }

        // A task that never reported back still counts as a failed attempt
        for (message_id, attempt_count) in unsettled {
            let error = SystemError::Internal("delivery task did not complete".to_string());
            self.settle(&message_id, attempt_count, Err(error.into()), &mut report);
        }

        report
    }

    /// Apply one delivery outcome to the queue and the history sink
    fn settle(
        &self,
        message_id: &MessageId,
        attempt_count: u32,
        outcome: Result<(), DeliveryError>,
        report: &mut BatchReport,
    ) {
        let now = self.clock.now();

        let error = match outcome {
            Ok(()) => {
                if self.queue.mark_sent(message_id, now) {
                    report.sent += 1;
                    debug!(message_id = %message_id, "Notification sent");
                    self.record(HistoryEventKind::Sent, message_id, now);
                }
                return;
            }
            Err(error) => error,
        };

        let decision = self.config.retry.on_failure(attempt_count, &error, now);
        let Some(message) = self
            .queue
            .apply_failure(message_id, decision, error.to_string(), now)
        else {
            return;
        };

        match decision {
            RetryDecision::Retry { attempt_count, .. } => {
                report.retried += 1;
                warn!(
                    message_id = %message_id,
                    attempt = attempt_count,
                    remaining = self.config.retry.remaining_attempts(attempt_count),
                    error = %error,
                    "Delivery attempt failed, will retry"
                );
                self.history
                    .record(HistoryEvent::new(HistoryEventKind::Retrying, &message, now));
            }
            RetryDecision::Fail { attempt_count } => {
                report.failed += 1;
                error!(
                    message_id = %message_id,
                    attempt = attempt_count,
                    error = %error,
                    "Delivery failed permanently"
                );
                self.history
                    .record(HistoryEvent::new(HistoryEventKind::Failed, &message, now));
            }
        }
    }

    fn record(&self, kind: HistoryEventKind, message_id: &MessageId, now: SystemTime) {
        if let Some(message) = self.queue.get(message_id) {
            self.history.record(HistoryEvent::new(kind, &message, now));
        }
    }
}
