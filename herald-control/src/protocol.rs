//! Control protocol types and serialization
//!
//! Every message on the socket is a frame: a big-endian `u32` length followed
//! by that many bytes of bincode (legacy configuration).

use std::fmt::{Display, Formatter};

use chrono::{TimeZone, Utc, offset::LocalResult};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest request frame the server accepts (1MB)
pub const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Largest response frame the client accepts (10MB)
pub const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Format a Unix timestamp (seconds) as human-readable
fn format_timestamp(timestamp_secs: u64) -> String {
    let datetime = Utc.timestamp_opt(i64::try_from(timestamp_secs).unwrap_or(0), 0);
    if let LocalResult::Single(dt) = datetime {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// The actual command to execute
    pub command: RequestCommand,
}

/// Request command types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCommand {
    /// System management commands
    System(SystemCommand),
    /// Queue management commands
    Queue(QueueCommand),
}

/// System management commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Get system status and statistics
    Status,
}

/// Queue management commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueCommand {
    /// List messages in the queue
    List {
        /// Filter by status (optional, all messages when absent)
        status: Option<String>,
    },
    /// View detailed information about a specific message
    View {
        /// Message ID to view
        message_id: String,
    },
    /// Reset a failed message to pending
    Retry {
        /// Message ID to retry
        message_id: String,
    },
    /// Reset every failed message to pending
    RetryAllFailed,
    /// Drop every failed message
    ClearFailed,
    /// Get queue statistics
    Stats,
    /// Enqueue a test notification
    SendTest {
        /// Where to send it
        recipient: String,
    },
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

/// Response payload types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed with error message
    Error(String),
}

/// Response data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// System status information
    SystemStatus(SystemStatus),
    /// Queue message list
    QueueList(Vec<QueueMessage>),
    /// Queue message details
    QueueMessageDetails(QueueMessageDetails),
    /// Queue statistics
    QueueStats(QueueStats),
    /// Number of messages an operator action affected
    Affected(usize),
    /// Simple string message
    Message(String),
}

/// System status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    pub queue: QueueStats,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version:   {}", self.version)?;
        writeln!(f, "Uptime:    {}s", self.uptime_secs)?;
        write!(f, "{}", self.queue)
    }
}

/// Queue message summary (for list command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Message ID
    pub id: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub template: Option<String>,
    /// Delivery status
    pub status: String,
    /// Number of failed delivery attempts
    pub attempts: u32,
    /// Time the message was enqueued (Unix timestamp in seconds)
    pub created_at: u64,
    /// Time the message was sent or failed (Unix timestamp in seconds)
    pub processed_at: Option<u64>,
}

impl Display for QueueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(f, "To:        {}", self.recipients.join(", "))?;
        writeln!(f, "Subject:   {}", self.subject)?;
        if let Some(template) = &self.template {
            writeln!(f, "Template:  {template}")?;
        }
        writeln!(f, "Status:    {}", self.status)?;
        writeln!(f, "Attempts:  {}", self.attempts)?;
        writeln!(f, "Queued:    {}", format_timestamp(self.created_at))?;
        if let Some(processed_at) = self.processed_at {
            writeln!(f, "Processed: {}", format_timestamp(processed_at))?;
        }
        Ok(())
    }
}

/// Queue message details (for view command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessageDetails {
    pub summary: QueueMessage,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Earliest time of the next attempt (Unix timestamp in seconds)
    pub not_before: Option<u64>,
    /// Payload rendered for display, truncated
    pub payload_preview: String,
}

impl Display for QueueMessageDetails {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary)?;
        if let Some(not_before) = self.not_before {
            writeln!(f, "Next try:  {}", format_timestamp(not_before))?;
        }
        if let Some(error) = &self.last_error {
            writeln!(f, "Last error: {error}")?;
        }

        f.write_str("\n--- Payload Preview ---\n")?;
        writeln!(f, "{}", self.payload_preview)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
}

impl Display for QueueStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total:     {}", self.total)?;
        writeln!(f, "Pending:   {}", self.pending)?;
        writeln!(f, "In flight: {}", self.processing)?;
        writeln!(f, "Sent:      {}", self.sent)?;
        writeln!(f, "Failed:    {}", self.failed)
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    #[must_use]
    pub const fn system(command: SystemCommand) -> Self {
        Self::new(RequestCommand::System(command))
    }

    #[must_use]
    pub const fn queue(command: QueueCommand) -> Self {
        Self::new(RequestCommand::Queue(command))
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Check if the response version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

/// Read one length-prefixed frame and decode it
///
/// # Errors
///
/// [`ControlError::ConnectionClosed`] if the peer hung up before a frame
/// started, [`ControlError::FrameTooLarge`] for frames over `max_size`, and I/O
/// or decode errors otherwise.
pub async fn read_frame<T, R>(stream: &mut R, max_size: u32) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let size = u32::from_be_bytes(len_buf);
    if size > max_size {
        return Err(ControlError::FrameTooLarge {
            size,
            max: max_size,
        });
    }

    let mut bytes = vec![0u8; size as usize];
    stream.read_exact(&mut bytes).await?;

    let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
    Ok(value)
}

/// Encode `value` and write it as one length-prefixed frame
///
/// # Errors
///
/// I/O or encode errors, or a value too large for a `u32` length.
pub async fn write_frame<T, W>(stream: &mut W, value: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let size = u32::try_from(bytes.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    stream.write_all(&size.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::queue(QueueCommand::List {
            status: Some("failed".to_string()),
        });

        write_frame(&mut client, &request).await.unwrap();
        let received: Request = read_frame(&mut server, MAX_REQUEST_SIZE).await.unwrap();

        assert_eq!(received, request);
        assert!(received.is_version_compatible());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_REQUEST_SIZE + 1).to_be_bytes())
            .await
            .unwrap();

        let result: Result<Request> = read_frame(&mut server, MAX_REQUEST_SIZE).await;
        assert!(matches!(result, Err(ControlError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_closed_stream_reports_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let result: Result<Request> = read_frame(&mut server, MAX_REQUEST_SIZE).await;
        assert!(matches!(result, Err(ControlError::ConnectionClosed)));
    }

    #[test]
    fn test_response_helpers() {
        assert!(Response::ok().is_success());
        assert!(Response::data(ResponseData::Affected(2)).is_success());
        assert!(!Response::error("nope").is_success());
        assert!(Response::ok().is_version_compatible());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }
}
