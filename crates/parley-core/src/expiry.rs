//! TTL expiry of retained messages.
//!
//! One background task owns a min-heap of deadlines. Sessions push entries
//! through a channel when they retain a message; the task sleeps until the
//! earliest deadline and then asks the registry to drop the message. The task
//! only holds a weak reference to the registry and stops when the queue's
//! sender side is dropped.

use crate::message::MessageId;
use crate::registry::TopicRegistry;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Default message time-to-live.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(30);

/// A scheduled removal. Ordered by deadline first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    id: MessageId,
    topic: String,
}

/// Handle for scheduling message expiry.
#[derive(Debug, Clone)]
pub struct ExpiryQueue {
    sender: mpsc::UnboundedSender<Deadline>,
    ttl: Duration,
}

impl ExpiryQueue {
    /// Spawn the expiry task for `registry`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(registry: Weak<TopicRegistry>, ttl: Duration) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(receiver, registry));
        debug!(ttl_secs = ttl.as_secs_f64(), "Expiry task started");
        (Self { sender, ttl }, task)
    }

    /// Get the configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Schedule removal of a message one TTL from now.
    ///
    /// A TTL too large to represent as a deadline never expires; the message
    /// is then only dropped by the retention limit. Returns `false` if the
    /// expiry task has stopped.
    pub fn schedule(&self, topic: &str, id: MessageId) -> bool {
        let Some(at) = Instant::now().checked_add(self.ttl) else {
            trace!(topic = %topic, id, "TTL out of range, not scheduling expiry");
            return !self.sender.is_closed();
        };
        let deadline = Deadline {
            at,
            id,
            topic: topic.to_string(),
        };
        self.sender.send(deadline).is_ok()
    }
}

async fn run(mut receiver: mpsc::UnboundedReceiver<Deadline>, registry: Weak<TopicRegistry>) {
    let mut pending: BinaryHeap<Reverse<Deadline>> = BinaryHeap::new();

    loop {
        let next = pending.peek().map(|Reverse(d)| d.at);

        tokio::select! {
            scheduled = receiver.recv() => match scheduled {
                Some(deadline) => {
                    trace!(topic = %deadline.topic, id = deadline.id, "Scheduled expiry");
                    pending.push(Reverse(deadline));
                }
                None => break,
            },
            () = sleep_until_next(next) => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let now = Instant::now();
                while pending.peek().is_some_and(|Reverse(d)| d.at <= now) {
                    if let Some(Reverse(due)) = pending.pop() {
                        registry.expire_message(&due.topic, due.id);
                    }
                }
            }
        }
    }

    debug!(pending = pending.len(), "Expiry task stopped");
}

async fn sleep_until_next(next: Option<Instant>) {
    match next {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
