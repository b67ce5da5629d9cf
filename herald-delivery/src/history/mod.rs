//! Best-effort delivery history
//!
//! Every state change worth auditing (queued, sent, retrying, failed) is
//! offered to a [`HistorySink`]. Recording must never block the dispatch loop
//! or change a delivery outcome, so [`HistorySink::record`] is synchronous and
//! infallible. Which sink is in use is decided once, at construction:
//!
//! - [`NoopHistorySink`] when no store is configured
//! - [`ChannelHistorySink`] in front of a [`HistoryStore`], writing from a
//!   background task and logging, never propagating, store failures

mod file;
mod memory;

use std::{fmt::Debug, sync::Arc, time::SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::tracing::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

pub use self::{file::JsonLinesHistoryStore, memory::MemoryHistoryStore};
use crate::{
    error::HistoryError,
    types::{Message, MessageId, Recipient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEventKind {
    Queued,
    Sent,
    Retrying,
    Failed,
}

/// One entry of the delivery history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub message_id: MessageId,
    pub kind: HistoryEventKind,
    pub recipients: Arc<[Recipient]>,
    pub subject: Arc<str>,
    pub template: Option<Arc<str>>,
    /// Failed attempts so far
    pub attempt: u32,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl HistoryEvent {
    #[must_use]
    pub fn new(kind: HistoryEventKind, message: &Message, at: SystemTime) -> Self {
        Self {
            message_id: message.id,
            kind,
            recipients: Arc::clone(&message.recipients),
            subject: Arc::clone(&message.subject),
            template: message.template.clone(),
            attempt: message.attempt_count,
            error: message.last_error.clone(),
            at: at.into(),
        }
    }
}

/// Where history events are offered
pub trait HistorySink: Send + Sync + Debug {
    /// Hand over an event without waiting for it to be stored
    fn record(&self, event: HistoryEvent);
}

/// Sink used when no history store is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistorySink;

impl HistorySink for NoopHistorySink {
    fn record(&self, _event: HistoryEvent) {}
}

/// Persistent backing for history events
#[async_trait]
pub trait HistoryStore: Send + Sync + Debug {
    /// Append one event
    ///
    /// # Errors
    ///
    /// If the event could not be stored. The caller logs and drops it.
    async fn append(&self, event: &HistoryEvent) -> Result<(), HistoryError>;
}

/// Sink feeding a [`HistoryStore`] through a bounded buffer
///
/// When the buffer is full the event is dropped with a warning rather than
/// making the caller wait.
#[derive(Debug, Clone)]
pub struct ChannelHistorySink {
    sender: mpsc::Sender<HistoryEvent>,
}

impl ChannelHistorySink {
    /// Start the background writer for `store`
    ///
    /// The writer runs until every clone of the returned sink is dropped.
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn HistoryStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<HistoryEvent>(capacity.max(1));

        let writer = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = store.append(&event).await {
                    warn!(
                        message_id = %event.message_id,
                        kind = ?event.kind,
                        error = %e,
                        "Failed to record delivery history"
                    );
                }
            }

            debug!("History writer finished");
        });

        (Self { sender }, writer)
    }
}

impl HistorySink for ChannelHistorySink {
    fn record(&self, event: HistoryEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    message_id = %event.message_id,
                    kind = ?event.kind,
                    "History buffer full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    message_id = %event.message_id,
                    kind = ?event.kind,
                    "History writer stopped, dropping event"
                );
            }
        }
    }
}
