//! Fan-out of a payload to the members of a topic.

use crate::registry::TopicRegistry;
use std::sync::Arc;
use tracing::{trace, warn};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of members the payload was queued for.
    pub delivered: usize,
    /// Members whose delivery failed and who were removed from the topic.
    pub evicted: Vec<String>,
}

/// Deliver `payload` to every member of `topic` except `exclude`.
///
/// Works on a snapshot of the member map taken under a short read guard, so
/// members joining or leaving meanwhile may or may not be reached. Failed
/// deliveries are collected and those members evicted once every delivery has
/// been attempted. Never fails.
pub fn broadcast(
    registry: &TopicRegistry,
    topic: &str,
    payload: &Arc<str>,
    exclude: Option<&str>,
) -> BroadcastReport {
    let targets = registry.members_except(topic, exclude);
    let mut report = BroadcastReport::default();
    let mut failed = Vec::new();

    for (username, handle) in targets {
        match handle.deliver(Arc::clone(payload)) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(topic = %topic, username = %username, error = %e, "Delivery failed (will be removed)");
                failed.push((username, handle));
            }
        }
    }

    for (username, handle) in failed {
        if registry.evict(topic, &username, &handle) {
            report.evicted.push(username);
        }
    }

    trace!(
        topic = %topic,
        delivered = report.delivered,
        evicted = report.evicted.len(),
        "Broadcast complete"
    );
    report
}
