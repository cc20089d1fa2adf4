//! Chat messages retained by topics.

use parley_protocol::ServerFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A message identifier, unique within the process lifetime.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Topic the message was sent to.
    pub topic: String,
    /// Username of the author at the time of sending.
    pub author: String,
    /// Message text.
    pub text: String,
    /// Unix timestamp (seconds) assigned by the server.
    pub created_at: u64,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            topic: topic.into(),
            author: author.into(),
            text: text.into(),
            created_at: unix_timestamp(),
        }
    }

    /// The frame relayed to other members of the topic.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::chat(&self.author, &self.text, self.created_at)
    }
}
