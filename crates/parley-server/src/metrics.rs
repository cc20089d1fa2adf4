//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::HubStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "parley_connections_rejected_total";
    pub const TOPICS_ACTIVE: &str = "parley_topics_active";
    pub const MEMBERS_ACTIVE: &str = "parley_members_active";
    pub const MESSAGES_RETAINED: &str = "parley_messages_retained";
    pub const MESSAGES_PUBLISHED: &str = "parley_messages_published_total";
    pub const MESSAGES_EXPIRED: &str = "parley_messages_expired_total";
    pub const MEMBERS_EVICTED: &str = "parley_members_evicted_total";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades refused because the connection limit was reached"
    );
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Current number of topics");
    metrics::describe_gauge!(names::MEMBERS_ACTIVE, "Current number of joined members");
    metrics::describe_gauge!(
        names::MESSAGES_RETAINED,
        "Messages currently retained across all topics"
    );
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total chat messages published");
    metrics::describe_counter!(names::MESSAGES_EXPIRED, "Total messages removed by TTL");
    metrics::describe_counter!(
        names::MEMBERS_EVICTED,
        "Total members removed after a failed delivery"
    );
    metrics::describe_counter!(
        names::ERRORS_TOTAL,
        "Sessions closed by an error, by type"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an upgrade refused at the connection limit.
pub fn record_rejected() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Publish a hub snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::TOPICS_ACTIVE).set(stats.registry.topic_count as f64);
    gauge!(names::MEMBERS_ACTIVE).set(stats.registry.member_count as f64);
    gauge!(names::MESSAGES_RETAINED).set(stats.registry.retained_messages as f64);
    counter!(names::MESSAGES_PUBLISHED).absolute(stats.published_total);
    counter!(names::MESSAGES_EXPIRED).absolute(stats.registry.expired_total);
    counter!(names::MEMBERS_EVICTED).absolute(stats.evicted_total);
    counter!(names::ERRORS_TOTAL, "type" => "session").absolute(stats.session_faults_total);
    counter!(names::ERRORS_TOTAL, "type" => "transport").absolute(stats.transport_errors_total);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
