//! HTTP server exposing the session registry to a browser extension host.
//!
//! This module provides an HTTP server that:
//! - Starts and ends sessions as tabs open and close
//! - Accepts interaction events, context classifications and lock-mode
//!   signals per session
//! - Serves session snapshots for display surfaces
//! - Buffers published engine events for polling via `GET /events`
//!
//! # Architecture
//!
//! ```text
//! Extension ──→ POST /sessions/:id/events ──→ registry ──→ 1 Hz tick ──→ event bus
//!                                                                  ├──→ GET /events
//!                                                                  └──→ webhook
//! ```

use crate::config::Config;
use crate::core::snapshot::SessionSnapshot;
use crate::notify::{EngineEvent, EventBus, WebhookConfig, WebhookSink};
use crate::registry::SessionRegistry;
use crate::signal::{ContextCategory, ContextUpdate, InteractionEvent, LockMode};
use crate::stats::{create_shared_stats, StatsSnapshot};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Largest batch `GET /events` returns in one call.
const MAX_EVENTS_PER_POLL: usize = 256;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Engine configuration
    pub engine: Config,
    /// Optional webhook receiving every published event
    pub webhook: Option<WebhookConfig>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, engine: Config) -> Self {
        Self {
            port,
            engine,
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: WebhookConfig) -> Self {
        self.webhook = Some(webhook);
        self
    }
}

/// Shared server state
pub struct ServerState {
    registry: SessionRegistry,
    /// Server-side subscriber drained by `GET /events`
    events: Receiver<EngineEvent>,
}

impl ServerState {
    /// Build the registry, event bus and subscribers.
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let stats = create_shared_stats();
        let bus = EventBus::with_stats(stats.clone());
        let events = bus.subscribe(config.engine.event_buffer);

        if let Some(webhook) = &config.webhook {
            let sink = WebhookSink::new(webhook.clone())?;
            tracing::info!("Forwarding engine events to {}", sink.url());
            bus.add_sink(Arc::new(sink));
        }

        let registry = SessionRegistry::new(config.engine.clone(), bus, stats)?;
        Ok(Self { registry, events })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
    /// Event consumers currently attached to the bus
    pub subscribers: usize,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn unknown_session(id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        "UNKNOWN_SESSION",
        format!("No live session {id}"),
    )
}

/// Response from the session start endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session_id: String,
    /// False when the session was already live
    pub created: bool,
}

/// One event or a batch
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    One(InteractionEvent),
    Many(Vec<InteractionEvent>),
}

impl EventBatch {
    fn into_vec(self) -> Vec<InteractionEvent> {
        match self {
            EventBatch::One(event) => vec![event],
            EventBatch::Many(events) => events,
        }
    }
}

/// Response from the event ingest endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResponse {
    pub category: ContextCategory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeRequest {
    pub mode: LockMode,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    pub mode: LockMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreRequest {
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.registry.len(),
    })
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsSnapshot> {
    Json(state.registry.stats().stats())
}

fn start(state: &ServerState, id: String) -> Result<(StatusCode, Json<SessionStarted>), ApiError> {
    let created = state
        .registry
        .start_session(&id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "START_FAILED", e.to_string()))?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SessionStarted { session_id: id, created })))
}

/// POST /sessions
///
/// Starts a session under a fresh id.
async fn create_session(
    State(state): State<Arc<ServerState>>,
) -> Result<(StatusCode, Json<SessionStarted>), ApiError> {
    start(&state, uuid::Uuid::new_v4().to_string())
}

/// POST /sessions/:id
async fn start_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SessionStarted>), ApiError> {
    start(&state, id)
}

/// DELETE /sessions/:id
async fn end_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.registry.end_session(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_session(&id))
    }
}

/// GET /sessions/:id
async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .registry
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| unknown_session(&id))
}

/// POST /sessions/:id/events
///
/// Invalid events are rejected individually; the rest of the batch is
/// still applied.
async fn ingest_events(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(batch): Json<EventBatch>,
) -> Result<Json<IngestResponse>, ApiError> {
    if state.registry.snapshot(&id).is_none() {
        return Err(unknown_session(&id));
    }

    let mut response = IngestResponse {
        accepted: 0,
        rejected: 0,
        errors: Vec::new(),
    };
    for event in batch.into_vec() {
        match state.registry.record_event(&id, event) {
            Ok(true) => response.accepted += 1,
            Ok(false) => return Err(unknown_session(&id)),
            Err(e) => {
                response.rejected += 1;
                response.errors.push(e.to_string());
            }
        }
    }
    Ok(Json(response))
}

/// POST /sessions/:id/context
async fn set_context(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(update): Json<ContextUpdate>,
) -> Result<Json<CategoryResponse>, ApiError> {
    match state.registry.set_category(&id, &update) {
        Ok(Some(category)) => Ok(Json(CategoryResponse { category })),
        Ok(None) => Err(unknown_session(&id)),
        Err(e) => Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_CONTEXT",
            e.to_string(),
        )),
    }
}

/// POST /sessions/:id/mode
async fn set_mode(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<ModeRequest>,
) -> Result<StatusCode, ApiError> {
    if state.registry.set_mode(&id, request.mode, request.active) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_session(&id))
    }
}

/// POST /sessions/:id/complete
async fn complete(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> Result<StatusCode, ApiError> {
    if state.registry.complete(&id, request.mode) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_session(&id))
    }
}

/// PUT /sessions/:id/score
async fn set_score(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    match state.registry.set_score(&id, request.score) {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(unknown_session(&id)),
        Err(e) => Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_SCORE",
            e.to_string(),
        )),
    }
}

/// GET /events
///
/// Drains buffered engine events, oldest first.
async fn poll_events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EngineEvent>> {
    let limit = query
        .limit
        .unwrap_or(MAX_EVENTS_PER_POLL)
        .min(MAX_EVENTS_PER_POLL);
    Json(state.events.try_iter().take(limit).collect())
}

/// Build the router for the given state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/events", get(poll_events))
        .route("/sessions", post(create_session))
        .route(
            "/sessions/:id",
            post(start_session).get(get_session).delete(end_session),
        )
        .route("/sessions/:id/events", post(ingest_events))
        .route("/sessions/:id/context", post(set_context))
        .route("/sessions/:id/mode", post(set_mode))
        .route("/sessions/:id/complete", post(complete))
        .route("/sessions/:id/score", put(set_score))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                    // Allow chrome-extension origins
                    HeaderValue::from_static("chrome-extension://"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);
    let registry = state.registry.clone();
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("DSI engine server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        registry.shutdown();
        tracing::info!("{}", registry.stats().summary());
    });

    Ok((actual_addr, shutdown_tx))
}
