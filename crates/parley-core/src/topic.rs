//! Topic abstraction for Parley.
//!
//! A topic is a named room: the members currently joined under unique
//! usernames, plus a bounded window of recent messages.

use crate::member::MemberHandle;
use crate::message::{Message, MessageId};
use crate::store::MessageStore;
use crate::username::allocate_username;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Validate a topic name or username.
///
/// Names are opaque and case-sensitive; only emptiness and length are
/// checked.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_name(name: &str, max_length: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name cannot be empty");
    }
    if name.len() > max_length {
        return Err("name too long");
    }
    Ok(())
}

/// A topic with its members and retained messages.
#[derive(Debug)]
pub struct Topic {
    /// Topic name.
    name: String,
    /// Username to member handle.
    members: HashMap<String, MemberHandle>,
    /// Recent messages.
    store: MessageStore,
}

impl Topic {
    /// Create an empty topic retaining at most `retained_messages` messages.
    #[must_use]
    pub fn new(name: impl Into<String>, retained_messages: usize) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
            store: MessageStore::with_capacity(retained_messages),
        }
    }

    /// Get the topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a username is taken.
    #[must_use]
    pub fn has_member(&self, username: &str) -> bool {
        self.members.contains_key(username)
    }

    /// Check if the topic has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a member, deriving a unique username from `desired`.
    ///
    /// Returns the assigned username.
    pub fn add_member(&mut self, desired: &str, handle: MemberHandle) -> String {
        let username = allocate_username(desired, |name| self.members.contains_key(name));
        self.members.insert(username.clone(), handle);
        debug!(topic = %self.name, username = %username, "Member joined");
        username
    }

    /// Remove a member.
    ///
    /// Returns the member's handle if it was present.
    pub fn remove_member(&mut self, username: &str) -> Option<MemberHandle> {
        let handle = self.members.remove(username);
        if handle.is_some() {
            debug!(topic = %self.name, username = %username, "Member left");
        }
        handle
    }

    /// Remove a member only if it is still reached through `handle`.
    ///
    /// A username freed and taken again by another session is left alone.
    pub fn remove_member_if_same(&mut self, username: &str, handle: &MemberHandle) -> bool {
        let same = self
            .members
            .get(username)
            .is_some_and(|current| current.same_member(handle));
        same && self.remove_member(username).is_some()
    }

    /// Snapshot members, optionally leaving one out.
    #[must_use]
    pub fn members_except(&self, exclude: Option<&str>) -> Vec<(String, MemberHandle)> {
        self.members
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != exclude)
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }

    /// Retain a message.
    ///
    /// Returns the oldest message if retention capacity forced it out.
    pub fn append(&mut self, message: Message) -> Option<Message> {
        trace!(topic = %self.name, id = message.id, "Retaining message");
        let dropped = self.store.push(message);
        if let Some(old) = &dropped {
            trace!(topic = %self.name, id = old.id, "Dropped oldest message");
        }
        dropped
    }

    /// Remove a retained message.
    ///
    /// Returns `false` if it was not retained.
    pub fn remove_message(&mut self, id: MessageId) -> bool {
        self.store.remove(id)
    }

    /// Get the retained messages.
    #[must_use]
    pub fn messages(&self) -> &MessageStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::member_channel;

    #[test]
    fn test_topic_creation() {
        let topic = Topic::new("news", 10);
        assert_eq!(topic.name(), "news");
        assert_eq!(topic.member_count(), 0);
        assert!(topic.is_empty());
    }

    #[test]
    fn test_add_remove_members() {
        let mut topic = Topic::new("news", 10);
        let (h1, _i1) = member_channel(1);
        let (h2, _i2) = member_channel(1);

        assert_eq!(topic.add_member("alice", h1), "alice");
        assert_eq!(topic.add_member("alice", h2), "alice#2");
        assert_eq!(topic.member_count(), 2);

        assert!(topic.remove_member("alice").is_some());
        assert!(topic.remove_member("alice").is_none());
        assert!(topic.has_member("alice#2"));
    }

    #[test]
    fn test_remove_member_if_same() {
        let mut topic = Topic::new("news", 10);
        let (old, _i1) = member_channel(1);
        let (new, _i2) = member_channel(1);

        topic.add_member("bob", old.clone());
        topic.remove_member("bob");
        topic.add_member("bob", new);

        // The stale handle must not evict the new holder of the name.
        assert!(!topic.remove_member_if_same("bob", &old));
        assert!(topic.has_member("bob"));
    }

    #[test]
    fn test_members_except() {
        let mut topic = Topic::new("news", 10);
        for name in ["a", "b", "c"] {
            let (h, _i) = member_channel(1);
            topic.add_member(name, h);
        }

        let mut names: Vec<_> = topic
            .members_except(Some("a"))
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        names.sort();
        assert_eq!(names, ["b", "c"]);
        assert_eq!(topic.members_except(None).len(), 3);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("News", 8).is_ok());
        assert!(validate_name("", 8).is_err());
        assert!(validate_name("much-too-long", 8).is_err());
    }
}
