//! Eviction of finished messages
//!
//! Terminal messages stay visible to operators for a retention window after
//! they were processed, then get dropped to keep the queue's memory bounded.

use std::time::{Duration, SystemTime};

use super::DeliveryQueue;

impl DeliveryQueue {
    /// Remove `Sent` and `Failed` messages processed before `cutoff`
    ///
    /// Returns the number of messages removed.
    pub fn evict_older_than(&self, cutoff: SystemTime) -> usize {
        let mut evicted = 0;

        self.queue.retain(|_, message| {
            let expired = message.status.is_terminal()
                && message
                    .processed_at
                    .is_some_and(|processed| processed < cutoff);
            if expired {
                evicted += 1;
            }
            !expired
        });

        evicted
    }

    /// Remove terminal messages whose `processed_at` is more than `retention` before `now`
    pub fn evict_old(&self, retention: Duration, now: SystemTime) -> usize {
        now.checked_sub(retention)
            .map_or(0, |cutoff| self.evict_older_than(cutoff))
    }
}
