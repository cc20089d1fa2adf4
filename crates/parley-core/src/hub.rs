//! The hub: shared state handed to every session.
//!
//! A `Hub` owns the topic registry and the expiry queue. Sessions hold it
//! behind an `Arc`; there is no global state.

use crate::broadcast::{self, BroadcastReport};
use crate::error::HubError;
use crate::expiry::{ExpiryQueue, DEFAULT_MESSAGE_TTL};
use crate::member::{member_channel, MemberInbox, WeakMemberHandle, DEFAULT_OUTBOUND_BUFFER};
use crate::message::Message;
use crate::registry::{RegistryConfig, RegistryError, RegistryStats, TopicRegistry};
use parley_protocol::{codec, ServerFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long messages are retained.
    pub message_ttl: Duration,
    /// Registry limits.
    pub registry: RegistryConfig,
    /// Capacity of each member's outbound queue.
    pub outbound_buffer: usize,
    /// Maximum chat message size in bytes.
    pub max_message_size: usize,
    /// Close sessions that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            message_ttl: DEFAULT_MESSAGE_TTL,
            registry: RegistryConfig::default(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_size: 64 * 1024,
            idle_timeout: None,
        }
    }
}

/// A successful join.
#[derive(Debug)]
pub struct Joined {
    /// Topic joined.
    pub topic: String,
    /// Username assigned by the registry.
    pub username: String,
    /// Broadcasts addressed to the new member.
    pub inbox: MemberInbox,
    /// Identifies this membership without keeping the inbox open.
    pub member: WeakMemberHandle,
}

/// A message that was retained and fanned out.
#[derive(Debug, Clone)]
pub struct Published {
    /// The retained message.
    pub message: Message,
    /// Fan-out outcome.
    pub report: BroadcastReport,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registry snapshot.
    pub registry: RegistryStats,
    /// Messages published since start.
    pub published_total: u64,
    /// Members evicted after failed deliveries since start.
    pub evicted_total: u64,
    /// Sessions closed by an internal fault since start.
    pub session_faults_total: u64,
    /// Sessions closed by a transport failure since start.
    pub transport_errors_total: u64,
}

/// The connection/topic hub.
pub struct Hub {
    registry: Arc<TopicRegistry>,
    expiry: ExpiryQueue,
    expiry_task: JoinHandle<()>,
    published: AtomicU64,
    evicted: AtomicU64,
    session_faults: AtomicU64,
    transport_errors: AtomicU64,
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        let registry = Arc::new(TopicRegistry::with_config(config.registry.clone()));
        let (expiry, expiry_task) = ExpiryQueue::spawn(Arc::downgrade(&registry), config.message_ttl);
        info!(ttl_secs = config.message_ttl.as_secs(), "Hub started");

        Self {
            registry,
            expiry,
            expiry_task,
            published: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            session_faults: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get the topic registry.
    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Join a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid or a registry limit is reached.
    pub fn join(&self, topic: &str, desired: &str) -> Result<Joined, RegistryError> {
        let (handle, inbox) = member_channel(self.config.outbound_buffer);
        let member = handle.downgrade();
        let username = self.registry.join(topic, desired, handle)?;
        Ok(Joined {
            topic: topic.to_string(),
            username,
            inbox,
            member,
        })
    }

    /// Leave a topic by username. Returns `true` if a member was removed.
    pub fn leave(&self, topic: &str, username: &str) -> bool {
        self.registry.leave(topic, username)
    }

    /// Leave a topic, but only if `username` still belongs to `member`.
    ///
    /// After an eviction the name may already be held by a newer session,
    /// which must not be removed. Returns `true` if a member was removed.
    pub fn leave_member(&self, topic: &str, username: &str, member: &WeakMemberHandle) -> bool {
        match member.upgrade() {
            Some(handle) => self.registry.evict(topic, username, &handle),
            // Every strong handle is gone, so the registry already dropped it
            None => false,
        }
    }

    /// Snapshot of `(topic, member_count)` pairs.
    #[must_use]
    pub fn list(&self) -> Vec<(String, usize)> {
        self.registry.list()
    }

    /// Retain a chat message, schedule its expiry and relay it to every other
    /// member of the topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the author is no longer a member of the topic or
    /// the relayed frame cannot be encoded.
    pub fn publish(
        &self,
        topic: &str,
        author: &str,
        text: impl Into<String>,
    ) -> Result<Published, HubError> {
        let message = Message::new(topic, author, text);
        self.registry.append_message(message.clone())?;

        if !self.expiry.schedule(topic, message.id) {
            warn!(topic = %topic, id = message.id, "Expiry task stopped; message kept until trimmed");
        }

        let report = self.broadcast(topic, &message.to_frame(), Some(author))?;
        self.published.fetch_add(1, Ordering::Relaxed);

        Ok(Published { message, report })
    }

    /// Encode a frame once and deliver it to every member of `topic` except
    /// `exclude`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded.
    pub fn broadcast(
        &self,
        topic: &str,
        frame: &ServerFrame,
        exclude: Option<&str>,
    ) -> Result<BroadcastReport, HubError> {
        let payload: Arc<str> = Arc::from(codec::encode(frame)?);
        let report = broadcast::broadcast(&self.registry, topic, &payload, exclude);
        self.evicted
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Get the retained messages of a topic, oldest first.
    #[must_use]
    pub fn recent_messages(&self, topic: &str) -> Vec<Message> {
        self.registry.recent_messages(topic)
    }

    /// Count an error that closed a session.
    pub fn record_session_error(&self, error: &HubError) {
        let counter = if error.is_transport() {
            &self.transport_errors
        } else {
            &self.session_faults
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            registry: self.registry.stats(),
            published_total: self.published.load(Ordering::Relaxed),
            evicted_total: self.evicted.load(Ordering::Relaxed),
            session_faults_total: self.session_faults.load(Ordering::Relaxed),
            transport_errors_total: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.expiry_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_assigns_unique_names() {
        let hub = Hub::new();
        let first = hub.join("news", "alice").unwrap();
        let second = hub.join("news", "alice").unwrap();
        assert_eq!(first.username, "alice");
        assert_eq!(second.username, "alice#2");
        assert_eq!(hub.list(), vec![("news".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_publish_relays_to_others() {
        let hub = Hub::new();
        let mut alice = hub.join("news", "alice").unwrap();
        let mut bob = hub.join("news", "bob").unwrap();

        let published = hub.publish("news", &alice.username, "hi").unwrap();
        assert_eq!(published.report.delivered, 1);
        assert_eq!(hub.recent_messages("news").len(), 1);

        let relayed = bob.inbox.recv().await.unwrap();
        let frame: ServerFrame = serde_json::from_str(&relayed).unwrap();
        assert_eq!(
            frame,
            ServerFrame::chat("alice", "hi", published.message.created_at)
        );
        assert!(alice.inbox.try_recv().is_none());
        assert_eq!(hub.stats().published_total, 1);
    }

    #[tokio::test]
    async fn test_publish_requires_membership() {
        let hub = Hub::new();
        let _alice = hub.join("news", "alice").unwrap();
        assert!(matches!(
            hub.publish("news", "ghost", "boo"),
            Err(HubError::Registry(RegistryError::NotMember { .. }))
        ));
        assert!(matches!(
            hub.publish("elsewhere", "alice", "boo"),
            Err(HubError::Registry(RegistryError::TopicNotFound(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_published_messages_expire() {
        let hub = Hub::with_config(HubConfig {
            message_ttl: Duration::from_secs(30),
            ..HubConfig::default()
        });
        let alice = hub.join("news", "alice").unwrap();
        hub.publish("news", &alice.username, "hi").unwrap();

        tokio::time::sleep(Duration::from_secs(30) - Duration::from_millis(1)).await;
        assert_eq!(hub.recent_messages("news").len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(hub.recent_messages("news").is_empty());
    }

    #[tokio::test]
    async fn test_eviction_counted() {
        let hub = Hub::new();
        let alice = hub.join("t", "alice").unwrap();
        let bob = hub.join("t", "bob").unwrap();
        drop(bob.inbox);

        let published = hub.publish("t", &alice.username, "hi").unwrap();
        assert_eq!(published.report.evicted, ["bob"]);
        assert_eq!(hub.stats().evicted_total, 1);
        assert_eq!(hub.registry().member_count("t"), 1);

        // Cleanup for the evicted session must not touch a newer "bob"
        let _new_bob = hub.join("t", "bob").unwrap();
        assert!(!hub.leave_member("t", "bob", &bob.member));
        assert!(hub.registry().is_member("t", "bob"));
    }

    #[tokio::test]
    async fn test_session_errors_counted_by_kind() {
        let hub = Hub::new();
        hub.record_session_error(&HubError::Registry(RegistryError::TopicFull));
        hub.record_session_error(&HubError::Transport(
            parley_transport::TransportError::ConnectionClosed,
        ));
        hub.record_session_error(&HubError::Transport(
            parley_transport::TransportError::SendFailed("reset".to_string()),
        ));

        let stats = hub.stats();
        assert_eq!(stats.session_faults_total, 1);
        assert_eq!(stats.transport_errors_total, 2);
    }

    #[tokio::test]
    async fn test_leave_member_removes_own_membership() {
        let hub = Hub::new();
        let alice = hub.join("t", "alice").unwrap();
        assert!(hub.leave_member("t", &alice.username, &alice.member));
        assert!(!hub.registry().topic_exists("t"));
        assert!(!hub.leave_member("t", &alice.username, &alice.member));
    }
}
