//! WebSocket connection over an upgraded axum socket.
//!
//! Upgrade and ping/pong handling stay with axum and tungstenite; this type
//! only maps WebSocket messages to text frames.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, TransportError};

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
    max_frame_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    ///
    /// Inbound frames larger than `max_frame_size` bytes are rejected with a
    /// receive error.
    #[must_use]
    pub fn new(socket: WebSocket, max_frame_size: usize) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr: None,
            is_open: true,
            max_frame_size,
        }
    }

    /// Record the peer address reported by the HTTP layer.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_frame_size {
            warn!(
                connection = %self.id,
                "Frame too large: {} bytes (max: {})",
                len,
                self.max_frame_size
            );
            return Err(TransportError::ReceiveFailed(format!(
                "frame of {len} bytes exceeds {} bytes",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }

        // Nothing below awaits except `next`, which keeps this cancel safe.
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    // For compatibility, treat binary as UTF-8 text
                    self.check_size(data.len())?;
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by tungstenite on read
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        SinkExt::close(&mut self.socket)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
