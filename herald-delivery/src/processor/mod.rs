//! Delivery processor orchestration

pub mod cleanup;
pub mod delivery;
pub mod process;

use std::{
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use herald_common::{
    Signal, internal,
    tracing::{debug, error, info, warn},
};
use tokio::{
    sync::{broadcast, watch},
    time::MissedTickBehavior,
};

pub use self::process::{BatchReport, TickOutcome};
use crate::{
    clock::{Clock, SystemClock},
    config::DeliveryConfig,
    error::ConfigError,
    history::{HistorySink, NoopHistorySink},
    queue::DeliveryQueue,
    rate_limiter::RateLimiter,
    transport::Transport,
};

/// Drives rate limited batches of queued notifications through a [`Transport`]
///
/// The processor owns the queue. Producers and operators reach it through
/// [`crate::NotificationService`]; the periodic pass runs in [`Self::serve`]
/// or, for tests and embedders that want to step it by hand, [`Self::tick`].
#[derive(Debug)]
pub struct DeliveryProcessor {
    pub(crate) config: DeliveryConfig,
    pub(crate) queue: DeliveryQueue,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) history: Arc<dyn HistorySink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rate_limiter: RateLimiter,
    /// Set while a pass is running
    pub(crate) processing: AtomicBool,
    stop: watch::Sender<bool>,
}

impl DeliveryProcessor {
    /// Create a processor with no history sink and the system clock
    ///
    /// # Errors
    ///
    /// If the configuration cannot be run with, see [`DeliveryConfig::validate`].
    pub fn new(config: DeliveryConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;

        internal!(
            "Delivery processor configured: tick={}ms, batch_size={}, rate={}/min, max_retries={}, retention={}s",
            config.tick_interval_ms,
            config.batch_size,
            config.rate_per_minute,
            config.retry.max_retries,
            config.retention_secs
        );

        Ok(Self {
            rate_limiter: RateLimiter::new(config.rate_per_minute, config.batch_size),
            config,
            queue: DeliveryQueue::new(),
            transport,
            history: Arc::new(NoopHistorySink),
            clock: Arc::new(SystemClock),
            processing: AtomicBool::new(false),
            stop: watch::Sender::new(false),
        })
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run passes on the configured interval
    ///
    /// Returns once a shutdown signal arrives or [`Self::stop`] is called. A
    /// pass that is already running is allowed to finish first; messages left
    /// pending stay in the queue.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Delivery processor starting");

        let mut stop = self.stop.subscribe();
        let mut timer = tokio::time::interval(self.config.tick_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = async {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                } => {
                    internal!("Delivery processor stopped");
                    break;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!("Delivery processor received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Delivery processor missed {skipped} signals");
                        }
                        Err(e) => {
                            error!("Delivery processor shutdown channel error: {e}");
                            break;
                        }
                    }
                }
                _ = timer.tick() => {
                    // A stop may land while the previous pass was still settling
                    if self.is_stopped() {
                        break;
                    }

                    match self.tick().await {
                        TickOutcome::Dispatched(report) => {
                            info!(
                                sent = report.sent,
                                retried = report.retried,
                                failed = report.failed,
                                "Delivery batch settled"
                            );
                        }
                        TickOutcome::Busy => {
                            warn!("Previous delivery pass still running, skipping tick");
                        }
                        TickOutcome::RateLimited | TickOutcome::Idle => {}
                    }
                }
            }
        }

        let stats = self.queue.stats();
        internal!(
            "Delivery processor shutdown complete ({} pending, {} failed left in queue)",
            stats.pending,
            stats.failed
        );
    }

    /// Stop [`Self::serve`] after any pass in progress
    ///
    /// Calling this more than once, or before `serve` started, is harmless.
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            internal!("Delivery processor stop requested");
        }
    }

    /// Whether [`Self::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Get a reference to the delivery queue
    pub const fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Smallest gap between two batches under the configured rate
    pub const fn batch_interval(&self) -> Duration {
        self.rate_limiter.min_interval()
    }
}
