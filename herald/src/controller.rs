use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
    time::Duration,
};

use herald_common::{Signal, internal, logging, tracing};
use herald_control::{ControlServer, DEFAULT_CONTROL_SOCKET};
use herald_delivery::{
    ChannelHistorySink, DeliveryConfig, DeliveryProcessor, JsonLinesHistoryStore,
};
use serde::Deserialize;
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinHandle},
};

use crate::{control_handler::HeraldControlHandler, transport::TransportConfig};

/// How long running components get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const fn default_history_buffer() -> usize {
    1024
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_SOCKET)
}

const fn default_enabled() -> bool {
    true
}

/// Where delivery history is appended, one JSON document per line
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryConfig {
    pub path: PathBuf,
    /// Events buffered in memory while the writer catches up
    #[serde(default = "default_history_buffer")]
    pub buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(alias = "socket", default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            socket_path: default_socket_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub history: Option<HistoryConfig>,
    #[serde(default)]
    pub control: ControlConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for a termination signal, or for another component to request shutdown
///
/// `requested` must be subscribed before any component that may request a
/// shutdown is started.
async fn shutdown(mut requested: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
        _ = requested.recv() => {
            internal!("Shutdown requested");
            return Ok(());
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Wait up to `grace` for `task`, cancelling it if it is still running
///
/// Returns `None` if the task had to be cancelled. A cancelled task has
/// released everything it held by the time this returns.
async fn join_or_abort<T>(
    name: &str,
    mut task: JoinHandle<T>,
    grace: Duration,
) -> Option<Result<T, JoinError>> {
    if let Ok(joined) = tokio::time::timeout(grace, &mut task).await {
        return Some(joined);
    }

    tracing::warn!("{name} did not stop within {grace:?}, cancelling it");
    task.abort();
    let _ = task.await;
    None
}

impl Herald {
    /// Run the delivery processor and control socket until shutdown
    ///
    /// # Errors
    ///
    /// This function will return an error if the configuration is invalid,
    /// the transport or history store cannot be opened, or the control socket
    /// fails.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let transport = self.transport.build().await?;
        let mut processor = DeliveryProcessor::new(self.delivery, transport)?;

        let mut history_writer = None;
        if let Some(history) = &self.history {
            let store = JsonLinesHistoryStore::open(&history.path).await?;
            internal!("Recording delivery history to {}", history.path.display());

            let (sink, writer) = ChannelHistorySink::spawn(Arc::new(store), history.buffer);
            processor = processor.with_history(Arc::new(sink));
            history_writer = Some(writer);
        }

        let processor = Arc::new(processor);
        let requested = SHUTDOWN_BROADCAST.subscribe();

        let delivery = {
            let processor = Arc::clone(&processor);
            let signal = SHUTDOWN_BROADCAST.subscribe();
            tokio::spawn(async move { processor.serve(signal).await })
        };

        let control = if self.control.enabled {
            let handler = Arc::new(HeraldControlHandler::new(processor.clone()));
            let server = ControlServer::new(&self.control.socket_path, handler)?;
            let signal = SHUTDOWN_BROADCAST.subscribe();

            Some(tokio::spawn(async move {
                let result = server.serve(signal).await;
                if let Err(e) = &result {
                    tracing::error!("Control server failed: {e}");
                    let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
                }
                result
            }))
        } else {
            None
        };

        let ret = shutdown(requested).await;

        internal!("Shutting down...");

        processor.stop();
        join_or_abort("Delivery processor", delivery, SHUTDOWN_GRACE).await;

        let control = match control {
            Some(task) => match join_or_abort("Control server", task, SHUTDOWN_GRACE).await {
                Some(joined) => joined?.map_err(anyhow::Error::from),
                None => Ok(()),
            },
            None => Ok(()),
        };

        // The writer drains once the last sink is gone
        drop(processor);
        if let Some(writer) = history_writer {
            join_or_abort("History writer", writer, SHUTDOWN_GRACE).await;
        }

        ret.and(control)
    }
}
