//! Concurrent topic registry.
//!
//! Topics live in a sharded map. Every mutation of a topic happens while its
//! entry is held exclusively, so joins, leaves, message appends and expiries
//! on the same topic are serialized, while topics in other shards proceed
//! independently. A topic exists exactly while it has members: the leave that
//! removes the last member also removes the topic and its messages before the
//! entry is released.

use crate::member::MemberHandle;
use crate::message::{Message, MessageId};
use crate::topic::{validate_name, Topic};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid topic name or username.
    #[error("Invalid name: {0}")]
    InvalidName(&'static str),

    /// The topic already holds the maximum number of members.
    #[error("Topic is full")]
    TopicFull,

    /// Creating the topic would exceed the topic limit.
    #[error("Maximum topics reached")]
    MaxTopicsReached,

    /// Topic not found.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The username is not a member of the topic.
    #[error("{username} is not a member of {topic}")]
    NotMember {
        /// Topic name.
        topic: String,
        /// Username.
        username: String,
    },
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of topics.
    pub max_topics: usize,
    /// Maximum members per topic.
    pub max_members_per_topic: usize,
    /// Maximum retained messages per topic.
    pub max_retained_messages: usize,
    /// Maximum length of topic names and usernames.
    pub max_name_length: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_topics: 10_000,
            max_members_per_topic: 1024,
            max_retained_messages: 1000,
            max_name_length: 256,
        }
    }
}

/// The topic registry.
pub struct TopicRegistry {
    /// Topics indexed by name.
    topics: DashMap<String, Topic>,
    /// Messages removed by TTL expiry so far.
    expired: AtomicU64,
    /// Configuration.
    config: RegistryConfig,
}

impl TopicRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating topic registry with config: {:?}", config);
        Self {
            topics: DashMap::new(),
            expired: AtomicU64::new(0),
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Join a topic, creating it if absent.
    ///
    /// Returns the username assigned to the member, which is `desired` or
    /// `desired#n` if that is taken.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid or a limit is reached.
    pub fn join(
        &self,
        topic: &str,
        desired: &str,
        handle: MemberHandle,
    ) -> Result<String, RegistryError> {
        validate_name(topic, self.config.max_name_length).map_err(RegistryError::InvalidName)?;
        validate_name(desired, self.config.max_name_length)
            .map_err(RegistryError::InvalidName)?;

        // Counting shards while holding an entry would deadlock, so the topic
        // limit is checked up front and is approximate under concurrent joins.
        let at_topic_limit = self.topics.len() >= self.config.max_topics;

        match self.topics.entry(topic.to_string()) {
            Entry::Occupied(mut entry) => {
                let topic = entry.get_mut();
                if topic.member_count() >= self.config.max_members_per_topic {
                    return Err(RegistryError::TopicFull);
                }
                Ok(topic.add_member(desired, handle))
            }
            Entry::Vacant(entry) => {
                if at_topic_limit {
                    return Err(RegistryError::MaxTopicsReached);
                }
                debug!(topic = %topic, "Creating new topic");
                let mut new_topic = Topic::new(topic, self.config.max_retained_messages);
                let username = new_topic.add_member(desired, handle);
                entry.insert(new_topic);
                Ok(username)
            }
        }
    }

    /// Leave a topic.
    ///
    /// Missing topics and members are a no-op, so this may be called from
    /// several cleanup paths. Returns `true` if a member was removed.
    pub fn leave(&self, topic: &str, username: &str) -> bool {
        self.remove_where(topic, username, |t| t.remove_member(username).is_some())
    }

    /// Evict a member only if `username` still maps to `handle`.
    ///
    /// Returns `true` if the member was removed.
    pub fn evict(&self, topic: &str, username: &str, handle: &MemberHandle) -> bool {
        self.remove_where(topic, username, |t| t.remove_member_if_same(username, handle))
    }

    fn remove_where<F>(&self, topic: &str, username: &str, remove: F) -> bool
    where
        F: FnOnce(&mut Topic) -> bool,
    {
        let Entry::Occupied(mut entry) = self.topics.entry(topic.to_string()) else {
            return false;
        };

        let removed = remove(entry.get_mut());
        if removed {
            debug!(
                topic = %topic,
                username = %username,
                members = entry.get().member_count(),
                "Removed member"
            );
        }

        if entry.get().is_empty() {
            entry.remove();
            info!(topic = %topic, "Deleted empty topic");
        }

        removed
    }

    /// Snapshot of `(topic, member_count)` pairs, sorted by topic name.
    ///
    /// Each topic is read under its own short-lived guard, so the listing is
    /// a point-in-time view per topic rather than across all of them.
    #[must_use]
    pub fn list(&self) -> Vec<(String, usize)> {
        let mut topics: Vec<(String, usize)> = self
            .topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.member_count()))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }

    /// Check if a topic exists.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Get the member count of a topic.
    #[must_use]
    pub fn member_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.member_count())
            .unwrap_or(0)
    }

    /// Check if a username is a member of a topic.
    #[must_use]
    pub fn is_member(&self, topic: &str, username: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|t| t.has_member(username))
    }

    /// Snapshot the members of a topic, optionally leaving one out.
    #[must_use]
    pub fn members_except(&self, topic: &str, exclude: Option<&str>) -> Vec<(String, MemberHandle)> {
        self.topics
            .get(topic)
            .map(|t| t.members_except(exclude))
            .unwrap_or_default()
    }

    /// Retain a message in its topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is gone or the author is not a member.
    pub fn append_message(&self, message: Message) -> Result<(), RegistryError> {
        let mut topic = self
            .topics
            .get_mut(&message.topic)
            .ok_or_else(|| RegistryError::TopicNotFound(message.topic.clone()))?;

        if !topic.has_member(&message.author) {
            return Err(RegistryError::NotMember {
                topic: message.topic.clone(),
                username: message.author.clone(),
            });
        }

        topic.append(message);
        Ok(())
    }

    /// Remove a retained message.
    ///
    /// Returns `false` if the topic or the message is already gone.
    pub fn remove_message(&self, topic: &str, id: MessageId) -> bool {
        self.topics
            .get_mut(topic)
            .is_some_and(|mut t| t.remove_message(id))
    }

    /// Remove a message whose TTL has elapsed.
    ///
    /// The topic may have been deleted in the meantime, which is a no-op.
    pub fn expire_message(&self, topic: &str, id: MessageId) -> bool {
        let removed = self.remove_message(topic, id);
        if removed {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %topic, id = id, "Expired message");
        } else {
            trace!(topic = %topic, id = id, "Expiry for message already gone");
        }
        removed
    }

    /// Get the retained messages of a topic, oldest first.
    #[must_use]
    pub fn recent_messages(&self, topic: &str) -> Vec<Message> {
        self.topics
            .get(topic)
            .map(|t| t.messages().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            expired_total: self.expired.load(Ordering::Relaxed),
            ..RegistryStats::default()
        };
        for topic in self.topics.iter() {
            stats.topic_count += 1;
            stats.member_count += topic.member_count();
            stats.retained_messages += topic.messages().len();
        }
        stats
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of active topics.
    pub topic_count: usize,
    /// Number of joined members across topics.
    pub member_count: usize,
    /// Number of retained messages across topics.
    pub retained_messages: usize,
    /// Messages removed by TTL expiry since start.
    pub expired_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::member_channel;
    use std::sync::Arc;

    fn join(registry: &TopicRegistry, topic: &str, name: &str) -> String {
        let (handle, _inbox) = member_channel(8);
        registry.join(topic, name, handle).unwrap()
    }

    #[test]
    fn test_join_leave_lifecycle() {
        let registry = TopicRegistry::new();

        assert_eq!(join(&registry, "news", "alice"), "alice");
        assert!(registry.topic_exists("news"));
        assert_eq!(registry.member_count("news"), 1);

        assert!(registry.leave("news", "alice"));
        // Topic should be deleted with its last member
        assert!(!registry.topic_exists("news"));

        // Leaving twice is a no-op
        assert!(!registry.leave("news", "alice"));
    }

    #[test]
    fn test_usernames_suffixed_in_join_order() {
        let registry = TopicRegistry::new();
        let names: Vec<_> = (0..3).map(|_| join(&registry, "news", "alice")).collect();
        assert_eq!(names, ["alice", "alice#2", "alice#3"]);

        // Same name in another topic is independent
        assert_eq!(join(&registry, "sports", "alice"), "alice");
    }

    #[test]
    fn test_concurrent_joins_get_distinct_names() {
        let registry = Arc::new(TopicRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|_| join(&registry, "busy", "u"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut names: Vec<String> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(registry.member_count("busy"), total);
    }

    #[test]
    fn test_list_snapshot() {
        let registry = TopicRegistry::new();
        join(&registry, "news", "alice");
        join(&registry, "news", "bob");
        join(&registry, "art", "carol");

        assert_eq!(
            registry.list(),
            vec![("art".to_string(), 1), ("news".to_string(), 2)]
        );

        registry.leave("art", "carol");
        assert_eq!(registry.list(), vec![("news".to_string(), 2)]);
    }

    #[test]
    fn test_limits() {
        let registry = TopicRegistry::with_config(RegistryConfig {
            max_topics: 1,
            max_members_per_topic: 2,
            ..RegistryConfig::default()
        });

        join(&registry, "a", "u");
        join(&registry, "a", "u");

        let (handle, _inbox) = member_channel(1);
        assert!(matches!(
            registry.join("a", "u", handle.clone()),
            Err(RegistryError::TopicFull)
        ));
        assert!(matches!(
            registry.join("b", "u", handle.clone()),
            Err(RegistryError::MaxTopicsReached)
        ));
        assert!(matches!(
            registry.join("", "u", handle),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_messages_follow_topic_lifecycle() {
        let registry = TopicRegistry::new();
        join(&registry, "news", "alice");

        let msg = Message::new("news", "alice", "hi");
        let id = msg.id;
        registry.append_message(msg).unwrap();
        assert_eq!(registry.recent_messages("news").len(), 1);

        // Non-members cannot author messages
        assert!(matches!(
            registry.append_message(Message::new("news", "mallory", "x")),
            Err(RegistryError::NotMember { .. })
        ));

        registry.leave("news", "alice");
        assert!(registry.recent_messages("news").is_empty());
        // Expiry after the topic is gone is harmless
        assert!(!registry.expire_message("news", id));

        // A recreated topic starts without history
        join(&registry, "news", "bob");
        assert!(registry.recent_messages("news").is_empty());
    }

    #[test]
    fn test_expire_is_idempotent() {
        let registry = TopicRegistry::new();
        join(&registry, "news", "alice");

        let msg = Message::new("news", "alice", "hi");
        let id = msg.id;
        registry.append_message(msg).unwrap();

        assert!(registry.expire_message("news", id));
        assert!(!registry.expire_message("news", id));
        assert_eq!(registry.stats().expired_total, 1);
    }

    #[test]
    fn test_stats() {
        let registry = TopicRegistry::new();
        join(&registry, "a", "u");
        join(&registry, "a", "v");
        join(&registry, "b", "u");
        registry.append_message(Message::new("a", "u", "hi")).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.member_count, 3);
        assert_eq!(stats.retained_messages, 1);
    }
}
