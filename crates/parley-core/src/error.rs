//! Errors surfaced by the hub and sessions.

use crate::registry::RegistryError;
use parley_protocol::ProtocolError;
use parley_transport::TransportError;
use thiserror::Error;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HubError {
    /// Check if the error comes from the underlying connection.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, HubError::Transport(_))
    }
}
