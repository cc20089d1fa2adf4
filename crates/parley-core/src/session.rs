//! Connection sessions.
//!
//! A session drives one connection through
//! `Connecting → Handshake → Active → Closing → Closed`. Once the handshake
//! joins a topic, the membership is held by a guard whose `Drop` leaves the
//! topic, so every exit path (quit, disconnect, fault, panic or the task being
//! dropped) leaves exactly once.

use crate::error::HubError;
use crate::hub::{Hub, Joined};
use crate::member::{MemberInbox, WeakMemberHandle};
use crate::registry::RegistryError;
use parley_protocol::{codec, ClientFrame, ServerFrame};
use parley_transport::{Connection, TransportError};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Error text sent when the member was removed from its topic by the hub.
pub const REMOVED_FROM_TOPIC: &str = "Disconnected from topic";

/// Error text sent before closing an idle session.
pub const IDLE_TIMEOUT: &str = "Idle timeout";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, nothing received yet.
    Connecting,
    /// Waiting for the handshake frame.
    Handshake,
    /// Joined; relaying messages.
    Active,
    /// Leaving the topic and closing the transport.
    Closing,
    /// Terminal.
    Closed,
}

/// Outcome of waiting for an inbound frame.
#[derive(Debug)]
enum Received {
    Frame(String),
    Closed,
    Failed(TransportError),
    Idle,
}

/// Whether the receive loop keeps going after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Topic membership held for the lifetime of an active session.
struct Membership {
    hub: Arc<Hub>,
    topic: String,
    username: String,
    member: WeakMemberHandle,
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.hub.leave_member(&self.topic, &self.username, &self.member) {
            info!(topic = %self.topic, username = %self.username, "Cleaned up connection");
        } else {
            debug!(topic = %self.topic, username = %self.username, "Membership already removed");
        }
    }
}

/// A session over one connection.
pub struct Session<C> {
    conn: C,
    hub: Arc<Hub>,
    state: SessionState,
}

impl<C: Connection> Session<C> {
    /// Create a session for a freshly accepted connection.
    #[must_use]
    pub fn new(conn: C, hub: Arc<Hub>) -> Self {
        Self {
            conn,
            hub,
            state: SessionState::Connecting,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session until the connection ends.
    ///
    /// Never fails: errors are logged and close this session only. Returns
    /// immediately if the session already ran.
    pub async fn run(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }

        self.transition(SessionState::Handshake);
        let joined = match self.handshake().await {
            Ok(joined) => joined,
            Err(e) => {
                self.log_fault(&e);
                None
            }
        };

        if let Some((membership, inbox)) = joined {
            self.transition(SessionState::Active);
            if let Err(e) = self.active(&membership, inbox).await {
                self.log_fault(&e);
            }
            self.transition(SessionState::Closing);
            drop(membership);
        } else {
            self.transition(SessionState::Closing);
        }

        if let Err(e) = self.conn.close().await {
            debug!(connection = %self.conn.id(), error = %e, "Close failed");
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        trace!(connection = %self.conn.id(), from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    fn log_fault(&self, e: &HubError) {
        self.hub.record_session_error(e);
        if e.is_transport() {
            warn!(connection = %self.conn.id(), error = %e, "Connection lost");
        } else {
            error!(connection = %self.conn.id(), error = %e, "Unexpected error in session");
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        // A timeout past the end of the clock means no timeout
        self.hub
            .config()
            .idle_timeout
            .and_then(|limit| Instant::now().checked_add(limit))
    }

    async fn receive(&mut self, deadline: Option<Instant>) -> Received {
        let result = match deadline {
            Some(at) => match tokio::time::timeout_at(at, self.conn.recv()).await {
                Ok(result) => result,
                Err(_) => return Received::Idle,
            },
            None => self.conn.recv().await,
        };

        match result {
            Ok(Some(text)) => Received::Frame(text),
            Ok(None) => Received::Closed,
            Err(e) => Received::Failed(e),
        }
    }

    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), HubError> {
        let text = codec::encode(frame)?;
        self.conn.send(text).await?;
        Ok(())
    }

    /// Read the handshake and join. `None` means the session ends without
    /// having joined.
    async fn handshake(&mut self) -> Result<Option<(Membership, MemberInbox)>, HubError> {
        let deadline = self.idle_deadline();
        let text = match self.receive(deadline).await {
            Received::Frame(text) => text,
            Received::Closed => {
                debug!(connection = %self.conn.id(), "Closed before handshake");
                return Ok(None);
            }
            Received::Failed(e) => return Err(e.into()),
            Received::Idle => {
                self.send_frame(&ServerFrame::error(IDLE_TIMEOUT)).await?;
                return Ok(None);
            }
        };

        let max_name_length = self.hub.config().registry.max_name_length;
        let handshake = match codec::decode_handshake(&text, max_name_length) {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!(connection = %self.conn.id(), error = %e, "Rejected handshake");
                self.send_frame(&e.to_frame()).await?;
                return Ok(None);
            }
        };

        let Joined {
            topic,
            username,
            inbox,
            member,
        } = match self.hub.join(&handshake.topic, &handshake.username) {
            Ok(joined) => joined,
            Err(e) => {
                warn!(connection = %self.conn.id(), topic = %handshake.topic, error = %e, "Join refused");
                self.send_frame(&ServerFrame::error(e.to_string())).await?;
                return Ok(None);
            }
        };

        // From here on, dropping `membership` leaves the topic.
        let membership = Membership {
            hub: Arc::clone(&self.hub),
            topic,
            username,
            member,
        };

        info!(
            connection = %self.conn.id(),
            topic = %membership.topic,
            username = %membership.username,
            "User connected to topic"
        );

        self.send_frame(&ServerFrame::connected(&membership.username, &membership.topic))
            .await?;

        Ok(Some((membership, inbox)))
    }

    async fn active(
        &mut self,
        membership: &Membership,
        mut inbox: MemberInbox,
    ) -> Result<(), HubError> {
        let mut deadline = self.idle_deadline();

        loop {
            // Unbiased: neither the inbox nor the socket can starve the other
            tokio::select! {
                // Broadcasts from other members of the topic
                outbound = inbox.recv() => match outbound {
                    Some(payload) => self.conn.send(payload.to_string()).await?,
                    None => {
                        warn!(
                            topic = %membership.topic,
                            username = %membership.username,
                            "Removed from topic"
                        );
                        self.send_frame(&ServerFrame::error(REMOVED_FROM_TOPIC)).await?;
                        return Ok(());
                    }
                },

                received = self.receive(deadline) => match received {
                    Received::Frame(text) => {
                        deadline = self.idle_deadline();
                        if self.handle_frame(membership, &text).await? == Flow::Quit {
                            debug!(username = %membership.username, "Leaving topic");
                            return Ok(());
                        }
                    }
                    Received::Closed => {
                        debug!(username = %membership.username, "Disconnected");
                        return Ok(());
                    }
                    Received::Failed(e) => return Err(e.into()),
                    Received::Idle => {
                        debug!(username = %membership.username, "Idle timeout");
                        self.send_frame(&ServerFrame::error(IDLE_TIMEOUT)).await?;
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn handle_frame(&mut self, membership: &Membership, text: &str) -> Result<Flow, HubError> {
        let max_message_size = self.hub.config().max_message_size;

        match codec::decode_client_frame(text, max_message_size) {
            Ok(ClientFrame::List) => {
                let topics = self.hub.list();
                let listing =
                    codec::format_topic_list(topics.iter().map(|(name, count)| (name.as_str(), *count)));
                debug!(username = %membership.username, topics = topics.len(), "Sending /list output");
                self.conn.send(listing).await?;
            }
            Ok(ClientFrame::Quit) => return Ok(Flow::Quit),
            Ok(ClientFrame::Chat { message }) => {
                let published = match self
                    .hub
                    .publish(&membership.topic, &membership.username, message)
                {
                    Ok(published) => published,
                    // Evicted, but the inbox has not reported it yet
                    Err(HubError::Registry(
                        RegistryError::NotMember { .. } | RegistryError::TopicNotFound(_),
                    )) => {
                        warn!(
                            topic = %membership.topic,
                            username = %membership.username,
                            "Removed from topic"
                        );
                        self.send_frame(&ServerFrame::error(REMOVED_FROM_TOPIC)).await?;
                        return Ok(Flow::Quit);
                    }
                    Err(e) => return Err(e),
                };
                debug!(
                    topic = %membership.topic,
                    username = %membership.username,
                    id = published.message.id,
                    recipients = published.report.delivered,
                    "Message relayed"
                );
                self.send_frame(&ServerFrame::delivered(published.message.created_at))
                    .await?;
            }
            Err(e) => {
                debug!(username = %membership.username, error = %e, "Rejected frame");
                self.send_frame(&e.to_frame()).await?;
            }
        }

        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use async_trait::async_trait;
    use parley_transport::{ConnectionId, MemoryConnection, MemoryPeer};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn spawn_session(hub: &Arc<Hub>) -> (MemoryPeer, JoinHandle<SessionState>) {
        let (conn, peer) = MemoryConnection::pair();
        let hub = Arc::clone(hub);
        let task = tokio::spawn(async move {
            let mut session = Session::new(conn, hub);
            session.run().await;
            session.state()
        });
        (peer, task)
    }

    async fn recv_frame(peer: &mut MemoryPeer) -> ServerFrame {
        let text = peer.recv().await.expect("connection ended");
        serde_json::from_str(&text).expect("not a server frame")
    }

    async fn connect(hub: &Arc<Hub>, username: &str, topic: &str) -> (MemoryPeer, JoinHandle<SessionState>) {
        let (mut peer, task) = spawn_session(hub);
        peer.send(format!(r#"{{"username":"{username}","topic":"{topic}"}}"#))
            .unwrap();
        assert!(matches!(recv_frame(&mut peer).await, ServerFrame::Connected { .. }));
        (peer, task)
    }

    #[tokio::test]
    async fn test_duplicate_username_and_relay() {
        let hub = Arc::new(Hub::new());

        let (mut alice, _t1) = spawn_session(&hub);
        alice.send(r#"{"username":"alice","topic":"news"}"#).unwrap();
        assert_eq!(
            recv_frame(&mut alice).await,
            ServerFrame::connected("alice", "news")
        );

        let (mut second, _t2) = spawn_session(&hub);
        second.send(r#"{"username":"alice","topic":"news"}"#).unwrap();
        assert_eq!(
            recv_frame(&mut second).await,
            ServerFrame::connected("alice#2", "news")
        );

        alice.send(r#"{"message":"hi"}"#).unwrap();

        let ServerFrame::Delivered { timestamp, .. } = recv_frame(&mut alice).await else {
            panic!("expected delivery acknowledgment");
        };
        assert_eq!(
            recv_frame(&mut second).await,
            ServerFrame::chat("alice", "hi", timestamp)
        );
        assert_eq!(hub.recent_messages("news").len(), 1);
    }

    #[tokio::test]
    async fn test_list_command() {
        let hub = Arc::new(Hub::new());
        let (mut a, _t1) = connect(&hub, "a", "news").await;
        let (_b, _t2) = connect(&hub, "b", "news").await;

        a.send("/list").unwrap();
        assert_eq!(
            a.recv().await.as_deref(),
            Some("Active Topics:\nnews (2 users)")
        );
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_session() {
        let hub = Arc::new(Hub::new());
        let (mut peer, _task) = connect(&hub, "alice", "news").await;

        peer.send("not-json").unwrap();
        assert_eq!(
            recv_frame(&mut peer).await,
            ServerFrame::error("Invalid JSON payload")
        );

        peer.send(r#"{"text":"no message"}"#).unwrap();
        assert_eq!(
            recv_frame(&mut peer).await,
            ServerFrame::error("No message provided")
        );

        peer.send(r#"{"message":"still here"}"#).unwrap();
        assert!(matches!(
            recv_frame(&mut peer).await,
            ServerFrame::Delivered { .. }
        ));
    }

    #[tokio::test]
    async fn test_sole_member_disconnect_removes_topic() {
        let hub = Arc::new(Hub::new());
        let (mut peer, task) = connect(&hub, "solo", "x").await;
        assert!(hub.registry().topic_exists("x"));

        peer.close();
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(hub.list().iter().all(|(name, _)| name != "x"));
    }

    #[tokio::test]
    async fn test_quit_command_leaves() {
        let hub = Arc::new(Hub::new());
        let (mut stay, _t1) = connect(&hub, "stay", "room").await;
        let (quitter, task) = connect(&hub, "quit", "room").await;

        quitter.send("/quit").unwrap();
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert_eq!(hub.registry().member_count("room"), 1);

        stay.send("/list").unwrap();
        assert_eq!(
            stay.recv().await.as_deref(),
            Some("Active Topics:\nroom (1 users)")
        );
    }

    #[tokio::test]
    async fn test_handshake_errors_close_connection() {
        let hub = Arc::new(Hub::new());

        let (mut peer, task) = spawn_session(&hub);
        peer.send("not-json").unwrap();
        assert_eq!(
            recv_frame(&mut peer).await,
            ServerFrame::error("Invalid JSON in initial payload")
        );
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(peer.recv().await.is_none());

        let (mut peer, task) = spawn_session(&hub);
        peer.send(r#"{"username":"alice","topic":""}"#).unwrap();
        assert_eq!(
            recv_frame(&mut peer).await,
            ServerFrame::error("username and topic are required")
        );
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(hub.list().is_empty());
    }

    #[tokio::test]
    async fn test_closed_before_handshake() {
        let hub = Arc::new(Hub::new());
        let (mut peer, task) = spawn_session(&hub);
        peer.close();
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(hub.list().is_empty());
    }

    #[tokio::test]
    async fn test_join_refused_when_topic_full() {
        let mut config = HubConfig::default();
        config.registry.max_members_per_topic = 1;
        let hub = Arc::new(Hub::with_config(config));
        let (_first, _t1) = connect(&hub, "a", "tiny").await;

        let (mut peer, task) = spawn_session(&hub);
        peer.send(r#"{"username":"b","topic":"tiny"}"#).unwrap();
        assert_eq!(recv_frame(&mut peer).await, ServerFrame::error("Topic is full"));
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert_eq!(hub.registry().member_count("tiny"), 1);
    }

    #[tokio::test]
    async fn test_removed_member_is_told_and_closed() {
        let hub = Arc::new(Hub::new());
        let (mut peer, task) = connect(&hub, "kicked", "room").await;

        assert!(hub.leave("room", "kicked"));
        assert_eq!(
            recv_frame(&mut peer).await,
            ServerFrame::error(REMOVED_FROM_TOPIC)
        );
        assert_eq!(task.await.unwrap(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_member_count_tracks_sessions() {
        let hub = Arc::new(Hub::new());
        let mut peers = Vec::new();
        for _ in 0..3 {
            peers.push(connect(&hub, "u", "count").await);
        }
        assert_eq!(hub.registry().member_count("count"), 3);

        let (mut peer, task) = peers.remove(0);
        peer.close();
        task.await.unwrap();
        assert_eq!(hub.registry().member_count("count"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let hub = Arc::new(Hub::with_config(HubConfig {
            idle_timeout: Some(Duration::from_secs(60)),
            ..HubConfig::default()
        }));
        let (mut peer, task) = connect(&hub, "sleepy", "room").await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(recv_frame(&mut peer).await, ServerFrame::error(IDLE_TIMEOUT));
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(!hub.registry().topic_exists("room"));
    }

    #[tokio::test]
    async fn test_huge_ttl_and_idle_timeout_do_not_panic() {
        let hub = Arc::new(Hub::with_config(HubConfig {
            message_ttl: Duration::from_secs(u64::MAX),
            idle_timeout: Some(Duration::from_secs(u64::MAX)),
            ..HubConfig::default()
        }));
        let (mut peer, task) = connect(&hub, "alice", "room").await;

        peer.send(r#"{"message":"hi"}"#).unwrap();
        assert!(matches!(
            recv_frame(&mut peer).await,
            ServerFrame::Delivered { .. }
        ));
        assert_eq!(hub.recent_messages("room").len(), 1);

        peer.close();
        assert_eq!(task.await.unwrap(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_aborted_session_leaves_topic() {
        let hub = Arc::new(Hub::new());
        let (_peer, task) = connect(&hub, "alice", "room").await;
        assert!(hub.registry().topic_exists("room"));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!hub.registry().topic_exists("room"));
    }

    #[tokio::test]
    async fn test_chat_after_eviction_reports_removal() {
        let hub = Arc::new(Hub::new());
        let (mut peer, task) = connect(&hub, "kicked", "room").await;

        // A broadcast snapshot still holds the handle, so the inbox stays open
        let snapshot = hub.registry().members_except("room", None);
        assert!(hub.leave("room", "kicked"));

        peer.send(r#"{"message":"anyone?"}"#).unwrap();
        assert_eq!(
            recv_frame(&mut peer).await,
            ServerFrame::error(REMOVED_FROM_TOPIC)
        );
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert_eq!(hub.stats().session_faults_total, 0);
        drop(snapshot);
    }

    #[tokio::test]
    async fn test_inbound_frames_served_during_broadcast_backlog() {
        let hub = Arc::new(Hub::new());
        let (mut peer, _task) = connect(&hub, "busy", "room").await;

        let backlog = 200;
        for i in 0..backlog {
            hub.broadcast("room", &ServerFrame::chat("bot", i.to_string(), 0), None)
                .unwrap();
        }
        peer.send("/list").unwrap();

        let mut position = None;
        for i in 0..=backlog {
            let text = peer.recv().await.expect("connection ended");
            if text.starts_with("Active Topics:") {
                position = Some(i);
                break;
            }
        }
        assert!(position.is_some_and(|i| i < backlog));
    }

    #[tokio::test]
    async fn test_transport_failure_is_counted() {
        let hub = Arc::new(Hub::new());
        let conn = FlakyConnection {
            id: ConnectionId::new("flaky"),
            inbound: VecDeque::from([r#"{"username":"flaky","topic":"t"}"#.to_string()]),
            sends_left: 0,
        };

        let mut session = Session::new(conn, Arc::clone(&hub));
        session.run().await;
        assert_eq!(hub.stats().transport_errors_total, 1);
        assert_eq!(hub.stats().session_faults_total, 0);
    }

    /// Connection whose sends start failing after a fixed number of frames.
    struct FlakyConnection {
        id: ConnectionId,
        inbound: VecDeque<String>,
        sends_left: usize,
    }

    #[async_trait]
    impl Connection for FlakyConnection {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            match self.inbound.pop_front() {
                Some(text) => Ok(Some(text)),
                None => std::future::pending().await,
            }
        }

        async fn send(&mut self, _text: String) -> Result<(), TransportError> {
            if self.sends_left == 0 {
                return Err(TransportError::SendFailed("broken pipe".to_string()));
            }
            self.sends_left -= 1;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_send_failure_tears_down_and_leaves() {
        let hub = Arc::new(Hub::new());
        let conn = FlakyConnection {
            id: ConnectionId::new("flaky"),
            inbound: VecDeque::from([
                r#"{"username":"flaky","topic":"t"}"#.to_string(),
                r#"{"message":"hello"}"#.to_string(),
            ]),
            // Only the Connected frame gets through
            sends_left: 1,
        };

        let mut session = Session::new(conn, Arc::clone(&hub));
        session.run().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!hub.registry().topic_exists("t"));

        // A closed session does not run again
        session.run().await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}
