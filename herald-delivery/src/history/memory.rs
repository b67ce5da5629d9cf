use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{HistoryEvent, HistoryStore};
use crate::error::HistoryError;

/// In-memory history store
///
/// Keeps every event in a `Vec` behind an `RwLock`. Meant for tests and for
/// deployments that only want recent history in an operator view. An optional
/// capacity turns further appends into errors instead of growing without
/// bound.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    events: Arc<RwLock<Vec<HistoryEvent>>>,
    /// Maximum number of events to keep (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryHistoryStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store that refuses events beyond `capacity`
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Snapshot of every recorded event, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, event: &HistoryEvent) -> Result<(), HistoryError> {
        let mut events = self.events.write();

        if let Some(cap) = self.capacity
            && events.len() >= cap
        {
            return Err(HistoryError::Unavailable(format!(
                "Memory history capacity exceeded: {}/{cap} events",
                events.len()
            )));
        }

        events.push(event.clone());
        Ok(())
    }
}
