//! Transports selectable from the configuration file

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use herald_common::{internal, outgoing};
use herald_delivery::{
    DeliveryError, LogTransport, Message, Payload, PermanentError, Recipient, TemporaryError,
    Transport,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub enum TransportConfig {
    /// Log every message instead of sending it
    #[default]
    Log,
    /// Drop every message into an outbox directory for another process to pick up
    File { path: PathBuf },
}

impl TransportConfig {
    /// Construct the configured transport
    ///
    /// # Errors
    ///
    /// If the outbox directory of a file transport cannot be created.
    pub async fn build(&self) -> std::io::Result<Arc<dyn Transport>> {
        match self {
            Self::Log => Ok(Arc::new(LogTransport)),
            Self::File { path } => Ok(Arc::new(FileTransport::create(path).await?)),
        }
    }
}

/// What a [`FileTransport`] writes for each message
#[derive(Debug, Serialize)]
struct OutboxEntry<'a> {
    id: String,
    recipients: Vec<&'a str>,
    subject: &'a str,
    template: Option<&'a str>,
    payload: &'a Payload,
    /// Failed attempts before this one
    attempt: u32,
}

/// Writes each message as a RON document named `<id>.ron`
///
/// The document is written under a temporary name and renamed into place, so
/// anything watching the directory never sees a partial file. Redelivering a
/// message overwrites its earlier document.
#[derive(Debug, Clone)]
pub struct FileTransport {
    outbox: PathBuf,
}

impl FileTransport {
    /// Create the outbox directory if needed
    ///
    /// # Errors
    ///
    /// If the directory cannot be created.
    pub async fn create(outbox: impl Into<PathBuf>) -> std::io::Result<Self> {
        let outbox = outbox.into();
        tokio::fs::create_dir_all(&outbox).await?;
        internal!("Writing outgoing messages to {}", outbox.display());

        Ok(Self { outbox })
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    fn path_for(&self, message: &Message) -> PathBuf {
        self.outbox.join(format!("{}.ron", message.id))
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        let entry = OutboxEntry {
            id: message.id.to_string(),
            recipients: message.recipients.iter().map(Recipient::as_str).collect(),
            subject: &message.subject,
            template: message.template.as_deref(),
            payload: &message.payload,
            attempt: message.attempt_count,
        };

        let document = ron::ser::to_string_pretty(&entry, ron::ser::PrettyConfig::default())
            .map_err(|e| PermanentError::MessageRejected(e.to_string()))?;

        let target = self.path_for(message);
        let staging = target.with_extension("ron.tmp");

        let written = async {
            tokio::fs::write(&staging, document).await?;
            tokio::fs::rename(&staging, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(TemporaryError::Unavailable(format!(
                "Unable to write {}: {e}",
                target.display()
            ))
            .into());
        }

        outgoing!("[{}] written to {}", message.id, target.display());
        Ok(())
    }
}
