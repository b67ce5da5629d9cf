//! Retention sweep run at the end of every scheduler pass

use std::time::SystemTime;

use herald_common::tracing::debug;

use crate::processor::DeliveryProcessor;

impl DeliveryProcessor {
    /// Evict `Sent` and `Failed` messages older than the retention window
    ///
    /// Returns the number of messages removed.
    pub(crate) fn evict_expired(&self, now: SystemTime) -> usize {
        let evicted = self.queue.evict_old(self.config.retention(), now);

        if evicted > 0 {
            debug!(
                evicted,
                retention_secs = self.config.retention_secs,
                "Evicted finished notifications"
            );
        }

        evicted
    }
}
