//! # parley-protocol
//!
//! Wire protocol definitions for the Parley topic relay.
//!
//! Every frame is a single WebSocket text message. Frames sent by the server
//! are JSON objects, except for the reply to the `/list` command which is
//! plain text.
//!
//! ## Frame Types
//!
//! - `Handshake` - First client frame, `{"username", "topic"}`
//! - `ClientFrame` - Steady-state client frames: `/list`, `/quit` or `{"message"}`
//! - `ServerFrame` - Connected / Delivered / Chat / Error responses
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientFrame, ServerFrame};
//!
//! let frame = codec::decode_client_frame(r#"{"message":"hi"}"#, 1024).unwrap();
//! assert_eq!(frame, ClientFrame::Chat { message: "hi".to_string() });
//!
//! let ack = codec::encode(&ServerFrame::delivered(1_700_000_000)).unwrap();
//! assert_eq!(ack, r#"{"status":"delivered","timestamp":1700000000}"#);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode_client_frame, decode_handshake, encode, format_topic_list, ProtocolError};
pub use frames::{ClientFrame, Handshake, ServerFrame, Status};
