//! Control server implementation

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use herald_common::Signal;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    ControlError, Request, Response, Result,
    protocol::{MAX_REQUEST_SIZE, PROTOCOL_VERSION, read_frame, write_frame},
};

/// Per-connection read and write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler trait for processing control requests
///
/// Implement this trait to handle specific command types
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Control server for managing herald via Unix domain socket
pub struct ControlServer {
    socket_path: PathBuf,
    handler: Arc<dyn CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    ///
    /// # Errors
    ///
    /// Returns an error if the socket path is empty
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let socket_path = socket_path.into();

        if socket_path.as_os_str().is_empty() {
            return Err(ControlError::InvalidSocketPath(
                "socket path is empty".to_string(),
            ));
        }

        Ok(Self {
            socket_path,
            handler,
        })
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start the control server
    ///
    /// This function runs until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another running instance owns the socket
    /// - The socket cannot be bound
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = self.socket_path.as_path();

        if socket_path.exists() {
            // Test if socket is active by attempting connection
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!(
                        "Socket already in use by running instance: {}",
                        socket_path.display()
                    ),
                )));
            }

            info!("Removing stale socket file: {}", socket_path.display());
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;

        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(socket_path).await?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(socket_path, perms).await?;
        }

        info!(
            "Control socket listening with mode 0600 (owner only): {}",
            socket_path.display()
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    error!("Error handling control connection: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting control connection: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            info!("Control server shutting down");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(e) => {
                            error!("Control server shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        if socket_path.exists() {
            debug!("Removing socket file: {}", socket_path.display());
            if let Err(e) = tokio::fs::remove_file(socket_path).await {
                warn!("Failed to remove control socket: {e}");
            }
        }

        Ok(())
    }

    /// Handle a single client connection
    ///
    /// A connection may carry several requests; it ends when the client hangs
    /// up or stays silent past the I/O timeout.
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        loop {
            let request: Request =
                match tokio::time::timeout(IO_TIMEOUT, read_frame(&mut stream, MAX_REQUEST_SIZE))
                    .await
                    .map_err(|_| ControlError::Timeout)?
                {
                    Ok(request) => request,
                    Err(ControlError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                };

            trace!("Received request: {request:?}");

            let response = if request.is_version_compatible() {
                match handler.handle_request(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Error handling request: {e}");
                        Response::error(e.to_string())
                    }
                }
            } else {
                Response::error(format!(
                    "Incompatible protocol version: client={}, server={PROTOCOL_VERSION}",
                    request.version
                ))
            };

            trace!("Sending response: {response:?}");

            tokio::time::timeout(IO_TIMEOUT, write_frame(&mut stream, &response))
                .await
                .map_err(|_| ControlError::Timeout)??;
        }
    }
}
