//! Connection handlers for the huddle server.
//!
//! Authenticates WebSocket upgrades, hands accepted sockets to the client
//! pumps and serves the small management surface next to them.

use crate::auth::JwtAuthenticator;
use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use huddle_core::{
    run_client, Authenticator, ClientHandle, ClientIdentity, Hub, HubHandle, InMemoryMessageStore,
    MessageStore, RoomAuthority,
};
use huddle_protocol::RoomId;
use huddle_transport::websocket::{self, WebSocketConfig};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How often hub statistics are copied into gauges.
const STATS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Verifies bearer tokens.
    pub auth: Arc<dyn Authenticator>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with in-memory collaborators and start the hub.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let auth = Arc::new(JwtAuthenticator::from_config(&config.auth));
        let directory = Arc::new(config.directory.build());
        let store = Arc::new(InMemoryMessageStore::new());
        Self::with_collaborators(config, auth, directory, store)
    }

    /// Create app state around the given collaborators and start the hub.
    #[must_use]
    pub fn with_collaborators(
        config: Config,
        auth: Arc<dyn Authenticator>,
        authority: Arc<dyn RoomAuthority>,
        store: Arc<dyn MessageStore>,
    ) -> Arc<Self> {
        let hub = Hub::spawn(config.hub_config(), authority, store);
        Arc::new(Self { hub, auth, config })
    }
}

/// Build the HTTP routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/ws/stats", get(stats_handler))
        .route("/ws/broadcast/:room_id", post(broadcast_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = AppState::new(config.clone());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_stats_sampler(state.hub.clone(), STATS_SAMPLE_INTERVAL);
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    #[serde(default)]
    content: String,
}

/// Pick the bearer token: `?token=` first, then the Authorization header.
fn extract_token(query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn authenticate(
    state: &AppState,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<ClientIdentity, ApiError> {
    let Some(token) = extract_token(query, headers) else {
        metrics::record_upgrade_refused("missing_token");
        return Err(ApiError::unauthorized("missing token"));
    };

    state.auth.verify(&token).await.map_err(|e| {
        debug!(error = %e, "Authentication failed");
        metrics::record_upgrade_refused("invalid_token");
        ApiError::unauthorized("invalid token")
    })
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, query.token.as_deref(), &headers).await?;

    Ok(ws
        .max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity)))
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, identity: ClientIdentity) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let ws_config = WebSocketConfig {
        max_message_size: state.config.limits.max_message_size,
    };
    let (reader, writer) = websocket::split(socket, &ws_config);
    let (client, outbox) = ClientHandle::new(identity, state.config.limits.outbound_queue_capacity);

    debug!(
        connection = %client.id(),
        user = client.identity().user_id,
        "WebSocket connected"
    );

    run_client(
        state.hub.clone(),
        client,
        outbox,
        reader,
        writer,
        state.config.pump_config(),
    )
    .await;
}

/// Hub statistics.
async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authenticate(&state, query.token.as_deref(), &headers).await?;

    let stats = state.hub.stats().await.map_err(|e| {
        warn!(error = %e, "Stats unavailable");
        metrics::record_error("hub_stopped");
        ApiError::unavailable("hub is not running")
    })?;
    metrics::record_hub_stats(&stats);

    Ok(Json(serde_json::json!({
        "success": true,
        "data": stats,
    })))
}

/// Inject a system notice into a room.
async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, query.token.as_deref(), &headers).await?;

    let room: RoomId = room_id
        .parse()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| ApiError::bad_request("invalid room id"))?;

    let request: BroadcastRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("invalid request body"))?;
    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }

    state
        .hub
        .broadcast_system(room, request.content)
        .await
        .map_err(|e| {
            warn!(error = %e, "Broadcast dropped");
            metrics::record_error("hub_stopped");
            ApiError::unavailable("hub is not running")
        })?;

    metrics::record_admin_broadcast();
    info!(room, by = identity.user_id, "Admin broadcast queued");

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "broadcast queued",
    })))
}
