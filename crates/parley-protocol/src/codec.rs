//! Decoding client frames and encoding server frames.
//!
//! Decoding is deliberately lenient about shape: any JSON object is accepted
//! and only the fields that matter are read, so extra keys sent by clients are
//! ignored.

use serde_json::Value;
use thiserror::Error;

use crate::frames::{ClientFrame, Handshake, ServerFrame, LIST_COMMAND, LIST_HEADER, QUIT_COMMAND};

/// Protocol errors.
///
/// The `Display` output of every variant except [`ProtocolError::Encode`] is
/// the text sent to the client in an `{"error": ...}` frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The handshake frame is not valid JSON.
    #[error("Invalid JSON in initial payload")]
    InvalidHandshakeJson,

    /// The handshake frame lacks a non-empty `username` or `topic`.
    #[error("username and topic are required")]
    MissingHandshakeFields,

    /// A handshake field is longer than allowed.
    #[error("username and topic must be at most {0} bytes")]
    NameTooLong(usize),

    /// A steady-state frame is not valid JSON.
    #[error("Invalid JSON payload")]
    InvalidJson,

    /// A steady-state frame has no non-empty `message` string.
    #[error("No message provided")]
    MissingMessage,

    /// The message text exceeds the configured size.
    #[error("Message too large")]
    MessageTooLarge {
        /// Size of the rejected text in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Build the error frame reported to the client for this error.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::error(self.to_string())
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Decode the handshake frame.
///
/// # Errors
///
/// Returns an error if the text is not JSON, if either field is missing,
/// empty or not a string, or if either field exceeds `max_name_length` bytes.
pub fn decode_handshake(text: &str, max_name_length: usize) -> Result<Handshake, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| ProtocolError::InvalidHandshakeJson)?;

    let (Some(username), Some(topic)) = (
        non_empty_str(&value, "username"),
        non_empty_str(&value, "topic"),
    ) else {
        return Err(ProtocolError::MissingHandshakeFields);
    };

    if username.len() > max_name_length || topic.len() > max_name_length {
        return Err(ProtocolError::NameTooLong(max_name_length));
    }

    Ok(Handshake {
        username: username.to_string(),
        topic: topic.to_string(),
    })
}

/// Classify a steady-state frame.
///
/// Commands are matched after trimming surrounding whitespace; anything else
/// must be a JSON object carrying a non-empty `message` string.
///
/// # Errors
///
/// Returns an error if the text is not JSON, carries no message, or the
/// message is longer than `max_message_size` bytes.
pub fn decode_client_frame(text: &str, max_message_size: usize) -> Result<ClientFrame, ProtocolError> {
    match text.trim() {
        LIST_COMMAND => return Ok(ClientFrame::List),
        QUIT_COMMAND => return Ok(ClientFrame::Quit),
        _ => {}
    }

    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
    let message = non_empty_str(&value, "message").ok_or(ProtocolError::MissingMessage)?;

    if message.len() > max_message_size {
        return Err(ProtocolError::MessageTooLarge {
            size: message.len(),
            max: max_message_size,
        });
    }

    Ok(ClientFrame::Chat {
        message: message.to_string(),
    })
}

/// Encode a server frame as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Format the plain-text reply to `/list`.
///
/// The header line is always present, followed by one
/// `<topic> (<n> users)` line per topic.
pub fn format_topic_list<'a, I>(topics: I) -> String
where
    I: IntoIterator<Item = (&'a str, usize)>,
{
    let mut lines = vec![LIST_HEADER.to_string()];
    lines.extend(
        topics
            .into_iter()
            .map(|(name, count)| format!("{name} ({count} users)")),
    );
    lines.join("\n")
}
