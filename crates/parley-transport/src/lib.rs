//! # parley-transport
//!
//! Connection abstraction for the Parley topic relay.
//!
//! The hub never touches sockets directly. It drives a [`Connection`], which
//! yields already-decoded text frames and accepts text frames to write:
//!
//! - **WebSocket** - An axum WebSocket after upgrade
//! - **Memory** - An in-process channel pair, for tests and embedding
//!
//! ```rust,ignore
//! use parley_transport::Connection;
//!
//! async fn echo(mut conn: impl Connection) {
//!     while let Ok(Some(text)) = conn.recv().await {
//!         if conn.send(text).await.is_err() {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{Connection, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
