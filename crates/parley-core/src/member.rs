//! Member handles: how a topic reaches the session behind a username.
//!
//! Each joined session owns a [`MemberInbox`]; the topic holds the matching
//! [`MemberHandle`]. Delivery never waits: a full or closed inbox is reported
//! as a failure and the broadcaster evicts the member.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default capacity of a member's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Why a payload could not be handed to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The member's outbound queue is full.
    #[error("outbound queue full")]
    Full,

    /// The member's session has gone away.
    #[error("member disconnected")]
    Closed,
}

/// Sending half of a member's outbound queue, stored in the topic.
#[derive(Debug, Clone)]
pub struct MemberHandle {
    sender: mpsc::Sender<Arc<str>>,
}

/// A handle that does not keep the member's inbox open.
///
/// Held by the session so it can remove exactly its own membership on
/// cleanup.
#[derive(Debug, Clone)]
pub struct WeakMemberHandle {
    sender: mpsc::WeakSender<Arc<str>>,
}

/// Receiving half of a member's outbound queue, owned by the session.
#[derive(Debug)]
pub struct MemberInbox {
    receiver: mpsc::Receiver<Arc<str>>,
}

/// Create a handle/inbox pair with the given queue capacity.
#[must_use]
pub fn member_channel(capacity: usize) -> (MemberHandle, MemberInbox) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (MemberHandle { sender }, MemberInbox { receiver })
}

impl MemberHandle {
    /// Queue a payload for the member without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the inbox was dropped.
    pub fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        self.sender.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Check if the inbox has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Get a weak handle to the same inbox.
    #[must_use]
    pub fn downgrade(&self) -> WeakMemberHandle {
        WeakMemberHandle {
            sender: self.sender.downgrade(),
        }
    }

    /// Check if both handles feed the same inbox.
    #[must_use]
    pub fn same_member(&self, other: &MemberHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl WeakMemberHandle {
    /// Get a strong handle, unless every strong handle is already gone.
    #[must_use]
    pub fn upgrade(&self) -> Option<MemberHandle> {
        self.sender.upgrade().map(|sender| MemberHandle { sender })
    }
}

impl MemberInbox {
    /// Receive the next queued payload.
    ///
    /// Returns `None` once every handle is gone, which means the member was
    /// removed from its topic. Cancel safe.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    /// Receive a payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }
}
