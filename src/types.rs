use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Message to be delivered.
///
/// A `Message` is immutable once submitted. Its identity is `id`: the
/// dispatcher never looks at the payload fields, it only hands them to
/// the delivery backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Caller-assigned unique identifier.
    pub id: MessageId,

    /// Destination of the message (address, handle, channel...).
    pub recipient: String,

    pub subject: String,

    pub body: String,

    /// Arbitrary caller metadata, passed through untouched.
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Create a new message with empty metadata.
    pub fn new(
        id: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId(id.into()),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Unique identifier for a message.
///
/// Strongly-typed wrapper so message ids are not mixed up with
/// other string fields such as the recipient.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a message, as seen by callers.
///
/// `Queued` covers both "waiting in the queue" and "currently being
/// attempted". `Sent` and `Failed` are terminal. `Duplicate` is only ever
/// returned from a submission; it never replaces the original message's
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Queued,
    Duplicate,
    Sent,
    Failed,
    Unknown,
}

impl DeliveryOutcome {
    /// Whether no further automatic action will happen for the message.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryOutcome::Sent | DeliveryOutcome::Failed)
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryOutcome::Queued => "queued",
            DeliveryOutcome::Duplicate => "duplicate",
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub id: MessageId,

    /// Either `Queued` or `Duplicate`.
    pub outcome: DeliveryOutcome,
}

/// Delivery status details for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    pub outcome: DeliveryOutcome,

    /// Backend calls made so far, across all backends.
    pub attempts: u32,

    /// Name of the backend used by the last attempt.
    pub last_backend: Option<String>,

    pub last_error: Option<String>,

    pub last_updated_secs: u64,
}

impl DeliveryState {
    pub(crate) fn queued() -> Self {
        Self {
            outcome: DeliveryOutcome::Queued,
            attempts: 0,
            last_backend: None,
            last_error: None,
            last_updated_secs: now_secs(),
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
