//! Bounded, ordered retention of recent messages for one topic.

use crate::message::{Message, MessageId};
use std::collections::VecDeque;

/// Default number of messages retained per topic.
pub const DEFAULT_RETAINED_MESSAGES: usize = 1000;

/// Recent messages of a topic, oldest first.
#[derive(Debug)]
pub struct MessageStore {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_MESSAGES)
    }
}

impl MessageStore {
    /// Create a store keeping at most `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message.
    ///
    /// Returns the oldest message if it had to be dropped to stay within
    /// capacity.
    pub fn push(&mut self, message: Message) -> Option<Message> {
        let dropped = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        dropped
    }

    /// Remove the message with the given ID.
    ///
    /// Returns `false` if no such message is retained.
    pub fn remove(&mut self, id: MessageId) -> bool {
        match self.messages.iter().position(|m| m.id == id) {
            Some(index) => self.messages.remove(index).is_some(),
            None => false,
        }
    }

    /// Check if a message is retained.
    #[must_use]
    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Iterate over retained messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if no messages are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum number of retained messages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
