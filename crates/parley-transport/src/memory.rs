//! In-process connection pair.
//!
//! [`MemoryConnection`] is the server side handed to the hub; [`MemoryPeer`]
//! plays the client. Dropping or closing the peer looks like an orderly
//! disconnect to the server side.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, TransportError};

/// Server side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    is_open: bool,
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl MemoryConnection {
    /// Create a connected pair.
    #[must_use]
    pub fn pair() -> (MemoryConnection, MemoryPeer) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        let conn = MemoryConnection {
            id: ConnectionId::generate(),
            incoming: server_rx,
            outgoing: server_tx,
            is_open: true,
        };
        let peer = MemoryPeer {
            outgoing: Some(client_tx),
            incoming: client_rx,
        };
        (conn, peer)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }
        let frame = self.incoming.recv().await;
        if frame.is_none() {
            self.is_open = false;
        }
        Ok(frame)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.incoming.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

impl MemoryPeer {
    /// Send a text frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the peer was closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.outgoing
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next frame written by the server side.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.incoming.try_recv().ok()
    }

    /// Disconnect from the client side.
    pub fn close(&mut self) {
        self.outgoing = None;
    }
}
