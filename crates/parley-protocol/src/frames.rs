//! Frame types for the Parley protocol.
//!
//! Client frames arrive as WebSocket text. Server frames are serialized as
//! flat JSON objects whose shape identifies them, so there is no type tag.

use serde::{Deserialize, Serialize};

/// The literal command that requests a listing of active topics.
pub const LIST_COMMAND: &str = "/list";

/// The literal command that ends the session from the client side.
pub const QUIT_COMMAND: &str = "/quit";

/// Header line of the `/list` reply.
pub const LIST_HEADER: &str = "Active Topics:";

/// The first frame a client sends, naming who it is and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Desired username; the server may append a `#n` suffix.
    pub username: String,
    /// Topic to join.
    pub topic: String,
}

/// A classified steady-state frame from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `/list`: list active topics.
    List,
    /// `/quit`: close the session.
    Quit,
    /// A chat message for the topic.
    Chat {
        /// Message text.
        message: String,
    },
}

/// Value of the `status` field on status frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Handshake accepted.
    Connected,
    /// Chat message accepted and fanned out.
    Delivered,
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Handshake confirmation.
    Connected {
        /// Always [`Status::Connected`].
        status: Status,
        /// Username assigned by the server.
        username: String,
        /// Joined topic.
        topic: String,
    },

    /// Acknowledgment sent back to the author of a chat message.
    Delivered {
        /// Always [`Status::Delivered`].
        status: Status,
        /// Server-assigned Unix timestamp (seconds) of the message.
        timestamp: u64,
    },

    /// A chat message relayed to the other members of a topic.
    Chat {
        /// Author.
        username: String,
        /// Message text.
        message: String,
        /// Server-assigned Unix timestamp (seconds).
        timestamp: u64,
    },

    /// Error response.
    Error {
        /// Human-readable error message.
        error: String,
    },
}

impl ServerFrame {
    /// Create a Connected frame.
    #[must_use]
    pub fn connected(username: impl Into<String>, topic: impl Into<String>) -> Self {
        ServerFrame::Connected {
            status: Status::Connected,
            username: username.into(),
            topic: topic.into(),
        }
    }

    /// Create a Delivered frame.
    #[must_use]
    pub fn delivered(timestamp: u64) -> Self {
        ServerFrame::Delivered {
            status: Status::Delivered,
            timestamp,
        }
    }

    /// Create a Chat frame.
    #[must_use]
    pub fn chat(username: impl Into<String>, message: impl Into<String>, timestamp: u64) -> Self {
        ServerFrame::Chat {
            username: username.into(),
            message: message.into(),
            timestamp,
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: message.into(),
        }
    }

    /// Check if this is an error frame.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ServerFrame::Error { .. })
    }
}
