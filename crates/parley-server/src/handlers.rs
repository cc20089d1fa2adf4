//! HTTP and WebSocket handlers for the Parley server.
//!
//! Every upgraded socket is handed to a [`Session`], which owns the
//! handshake, the relay loop and cleanup for that connection.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_core::{Hub, Session};
use parley_transport::WebSocketConnection;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How often hub statistics are exported.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The topic hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    /// Open WebSocket connections.
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(Hub::with_config(config.hub_config())),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Largest WebSocket message accepted from a client.
    ///
    /// Leaves room for JSON framing and escaping so an oversized chat message
    /// is answered with a protocol error instead of a dropped connection.
    fn frame_limit(&self) -> usize {
        self.config
            .limits
            .max_message_size
            .saturating_mul(2)
            .saturating_add(1024)
    }
}

/// One slot of the connection limit, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/topics", get(topics_handler))
        .route(&ws_path, get(ws_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        tokio::spawn(report_stats(Arc::clone(&state.hub), STATS_INTERVAL));
    }

    let router = app(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Parley server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Export hub statistics every `period`.
async fn report_stats(hub: Arc<Hub>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        metrics::record_hub_stats(&hub.stats());
    }
}

/// Root handler.
async fn index_handler() -> &'static str {
    "WebSocket chat server is running. Connect to /ws"
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One row of the topic listing.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TopicSummary {
    /// Topic name.
    pub topic: String,
    /// Joined members.
    pub members: usize,
}

/// Topic listing handler.
async fn topics_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TopicSummary>> {
    Json(
        state
            .hub
            .list()
            .into_iter()
            .map(|(topic, members)| TopicSummary { topic, members })
            .collect(),
    )
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(remote = %addr, "Connection limit reached");
        metrics::record_rejected();
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.max_message_size(state.frame_limit())
        .on_upgrade(move |socket| handle_websocket(socket, addr, slot))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, addr: SocketAddr, slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let state = Arc::clone(&slot.state);

    let conn = WebSocketConnection::new(socket, state.frame_limit()).with_remote_addr(addr);
    debug!(remote = %addr, "WebSocket connected");

    let mut session = Session::new(conn, Arc::clone(&state.hub));
    session.run().await;

    debug!(remote = %addr, open = state.connection_count(), "WebSocket disconnected");
}
