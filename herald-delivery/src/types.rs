//! Type definitions for the notification delivery queue

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    str::FromStr,
    sync::Arc,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

/// Identifier for a queued notification
///
/// A ULID assigned at enqueue time. It is unique, stable for the lifetime of
/// the message, and prints as its 26 character Crockford base32 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Get the underlying ULID
    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim()).map(|id| Self { id })
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An addressable notification target
///
/// The queue never looks inside a recipient; it is handed to the transport
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(Arc<str>);

impl Recipient {
    #[must_use]
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(Arc::from(address.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Recipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Recipient {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Opaque message content, passed through to the transport unexamined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// A pre-rendered body
    Raw(String),
    /// Data for the transport to render against the message's template
    Fields(BTreeMap<String, String>),
}

impl Default for Payload {
    fn default() -> Self {
        Self::Fields(BTreeMap::new())
    }
}

/// Where a message is in its delivery lifecycle
///
/// ```text
/// enqueue ──► Pending ──claim──► InFlight ──ok──► Sent
///               ▲                   │
///               ├──retries left─────┤
///               │                   └──exhausted──► Failed
///               └────────operator retry─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    InFlight,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// Whether no further automatic transition will happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown delivery status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for DeliveryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in-flight" | "inflight" | "in_flight" | "processing" => Ok(Self::InFlight),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A queued notification and its delivery state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Position in enqueue order, used to select pending messages first-in first-out
    pub sequence: u64,
    pub recipients: Arc<[Recipient]>,
    pub subject: Arc<str>,
    pub payload: Arc<Payload>,
    pub template: Option<Arc<str>>,
    /// Number of failed delivery attempts
    pub attempt_count: u32,
    pub status: DeliveryStatus,
    pub created_at: SystemTime,
    /// Set when the message reaches `Sent` or `Failed`
    pub processed_at: Option<SystemTime>,
    pub last_error: Option<String>,
    /// A retried message is not selected again before this time
    pub not_before: Option<SystemTime>,
}

impl Message {
    /// Whether the scheduler may select this message at `now`
    #[must_use]
    pub fn is_ready(&self, now: SystemTime) -> bool {
        self.status == DeliveryStatus::Pending && self.not_before.is_none_or(|t| t <= now)
    }

    /// Return a failed message to the pending pool with a fresh retry budget
    ///
    /// Returns `false`, leaving the message untouched, unless it is `Failed`.
    pub(crate) fn reset_for_retry(&mut self) -> bool {
        if self.status != DeliveryStatus::Failed {
            return false;
        }

        self.status = DeliveryStatus::Pending;
        self.attempt_count = 0;
        self.last_error = None;
        self.processed_at = None;
        self.not_before = None;
        true
    }
}

/// Queue counters for dashboards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    /// Messages currently being handed to the transport
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
}

impl QueueStats {
    pub(crate) const fn count(&mut self, status: DeliveryStatus) {
        self.total += 1;
        match status {
            DeliveryStatus::Pending => self.pending += 1,
            DeliveryStatus::InFlight => self.processing += 1,
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Failed => self.failed += 1,
        }
    }
}
