//! Haven HTTP REST API
//!
//! Axum server exposing the guided intake conversation, the `/chat`
//! completion endpoint, incident records and evidence upload.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions take already-extracted arguments and are tested directly.
//!
//! Caller identity arrives in the `x-user-id` header, set by the fronting
//! gateway. Authority status is looked up in `user_roles`.
//!
//! Endpoints:
//! - GET   /health                 - health check with DB status
//! - GET   /version                - server version info
//! - POST  /chat                   - stateless completion endpoint
//! - POST  /sessions               - open an intake conversation
//! - GET   /sessions/:id           - visible transcript and state
//! - POST  /sessions/:id/turns     - submit one user turn
//! - POST  /sessions/:id/summary   - end questioning and summarize
//! - POST  /sessions/:id/handoff   - consume the summary as a draft
//! - POST  /incidents              - create an incident
//! - GET   /incidents              - own incidents (all for authority)
//! - GET   /incidents/hotspots     - risk hotspots (authority)
//! - GET   /incidents/:id          - one incident (owner or authority)
//! - PATCH /incidents/:id          - owner edit of description/location
//! - PATCH /incidents/:id/status   - status change (authority)
//! - POST  /evidence               - upload an evidence file

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use haven_core::completion::prompts;
use haven_core::completion::wire::{ChatEndpointRequest, CompletionEnvelope, ErrorEnvelope};
use haven_core::models::{IncidentStatus, NewIncident};
use haven_core::store::{self, IncidentUpdate, StoreError};
use haven_core::{
    hotspots, CompletionBackend, CompletionError, CompletionProfile, EvidenceError, EvidenceStore,
    FailureKind, HavenConfig, IntakeDraft, SessionStatus, TurnController, TurnError,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::sessions::SessionRegistry;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Body and status produced by every inner function.
pub type HttpResponse = (StatusCode, serde_json::Value);

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub pool: PgPool,
    pub config: HavenConfig,
    pub backend: Arc<dyn CompletionBackend>,
    pub controller: Arc<TurnController>,
    pub sessions: Arc<SessionRegistry>,
    pub evidence: EvidenceStore,
}

impl HttpState {
    pub fn new(pool: PgPool, config: HavenConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        let controller = Arc::new(TurnController::from_config(backend.clone(), &config));
        let sessions = Arc::new(SessionRegistry::new(
            config.conversation.session_ttl_minutes,
        ));
        let evidence = EvidenceStore::from_config(&config.evidence);

        Self {
            pool,
            config,
            backend,
            controller,
            sessions,
            evidence,
        }
    }

    fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.config.conversation.turn_timeout_seconds)
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    // Leave room above the evidence limit so oversize uploads reach the
    // validator and get a descriptive error.
    let evidence_body_limit = state.evidence.max_bytes().saturating_add(64 * 1024);

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/chat", post(chat_handler))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/:id", get(get_session_handler))
        .route("/sessions/:id/turns", post(submit_turn_handler))
        .route("/sessions/:id/summary", post(summary_handler))
        .route("/sessions/:id/handoff", post(handoff_handler))
        .route(
            "/incidents",
            post(create_incident_handler).get(list_incidents_handler),
        )
        .route("/incidents/hotspots", get(hotspots_handler))
        .route(
            "/incidents/:id",
            get(get_incident_handler).patch(update_incident_handler),
        )
        .route("/incidents/:id/status", patch(update_status_handler))
        .route(
            "/evidence",
            post(evidence_handler).layer(DefaultBodyLimit::max(evidence_body_limit)),
        )
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Haven HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct TurnRequest {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> HttpResponse {
    (status, serde_json::json!(ErrorResponse::new(msg)))
}

// ============================================================================
// Error mapping
// ============================================================================

pub fn validation_status(error: &ValidationError) -> StatusCode {
    match error {
        ValidationError::EmptyInput | ValidationError::EmptyTranscript => StatusCode::BAD_REQUEST,
        ValidationError::AwaitingResponse
        | ValidationError::Completed
        | ValidationError::NotCompleted => StatusCode::CONFLICT,
    }
}

pub fn completion_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        FailureKind::Transport | FailureKind::MalformedResponse => StatusCode::BAD_GATEWAY,
    }
}

pub fn turn_error_response(error: &TurnError) -> HttpResponse {
    match error {
        TurnError::Validation(v) => (
            validation_status(v),
            serde_json::json!({
                "error": v.to_string(),
                "status": "error",
                "kind": "validation",
                "retryable": false,
            }),
        ),
        TurnError::Completion(c) => (
            completion_status(c.kind()),
            serde_json::json!({
                "error": c.to_string(),
                "status": "error",
                "kind": c.kind(),
                "retryable": c.is_retryable(),
            }),
        ),
    }
}

pub fn store_error_response(error: StoreError) -> HttpResponse {
    match error {
        StoreError::Invalid(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        StoreError::NotFound(id) => {
            error_response(StatusCode::NOT_FOUND, format!("incident {} not found", id))
        }
        StoreError::Database(e) => {
            tracing::error!(error = %e, "Incident store query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "database error")
        }
    }
}

pub fn evidence_error_response(error: EvidenceError) -> HttpResponse {
    let status = match &error {
        EvidenceError::Empty | EvidenceError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        EvidenceError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        EvidenceError::UnsupportedType(_) | EvidenceError::TypeMismatch { .. } => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        EvidenceError::Io(e) => {
            tracing::error!(error = %e, "Evidence write failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, error.to_string())
}

fn session_not_found(id: Uuid) -> HttpResponse {
    error_response(StatusCode::NOT_FOUND, format!("session {} not found", id))
}

// ============================================================================
// Identity
// ============================================================================

/// Parse the optional caller identity. A present but malformed header is
/// rejected rather than treated as anonymous.
pub fn caller_id(headers: &HeaderMap) -> Result<Option<Uuid>, HttpResponse> {
    match headers.get(USER_ID_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Some)
            .ok_or_else(|| {
                error_response(
                    StatusCode::UNAUTHORIZED,
                    "x-user-id header is not a valid user id",
                )
            }),
    }
}

fn require_caller(caller: Option<Uuid>) -> Result<Uuid, HttpResponse> {
    caller.ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "x-user-id header is required"))
}

async fn require_authority(pool: &PgPool, caller: Option<Uuid>) -> Result<Uuid, HttpResponse> {
    let caller = require_caller(caller)?;
    match store::is_authority(pool, caller).await {
        Ok(true) => Ok(caller),
        Ok(false) => Err(error_response(
            StatusCode::FORBIDDEN,
            "authority role required",
        )),
        Err(e) => Err(store_error_response(e)),
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check - queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &PgPool) -> HttpResponse {
    match haven_core::db::health_check(pool).await {
        Ok(pg_ver) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": pg_ver,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version - returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "haven/1",
    })
}

/// Inner chat - one stateless completion in the `/chat` wire format.
/// Errors use the `{ "error": ... }` envelope: 400 for a missing message,
/// 500 for everything else.
pub async fn chat_inner(
    backend: &dyn CompletionBackend,
    profile: &CompletionProfile,
    timeout: Duration,
    req: ChatEndpointRequest,
) -> HttpResponse {
    let Some(message) = req.message().map(str::to_string) else {
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!(ErrorEnvelope {
                error: "No message provided".to_string(),
            }),
        );
    };

    let request = profile.request(req.mode(), req.history, message);
    let result = match tokio::time::timeout(timeout, backend.complete(&request)).await {
        Ok(result) => result,
        Err(_) => Err(CompletionError::Timeout {
            seconds: timeout.as_secs(),
        }),
    };

    match result {
        Ok(reply) => (
            StatusCode::OK,
            serde_json::json!(CompletionEnvelope::from_reply(reply)),
        ),
        Err(e) => {
            tracing::warn!(mode = ?request.mode, kind = ?e.kind(), error = %e, "Chat request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!(ErrorEnvelope {
                    error: e.to_string(),
                }),
            )
        }
    }
}

pub async fn create_session_inner(sessions: &SessionRegistry, config: &HavenConfig) -> HttpResponse {
    let (id, _) = sessions.create().await;
    (
        StatusCode::CREATED,
        serde_json::json!({
            "id": id,
            "status": SessionStatus::Active,
            "turn_count": 0,
            "max_turns": config.conversation.max_turns,
            "greeting": prompts::greeting(&config.conversation.persona_name),
        }),
    )
}

pub async fn get_session_inner(sessions: &SessionRegistry, id: Uuid) -> HttpResponse {
    let Some(session) = sessions.get(id).await else {
        return session_not_found(id);
    };
    let s = session.lock().await;

    (
        StatusCode::OK,
        serde_json::json!({
            "id": s.id(),
            "status": s.status(),
            "turn_count": s.turn_count(),
            "transcript": s.visible_transcript(),
            "summary": s.summary(),
            "created_at": s.created_at(),
        }),
    )
}

pub async fn submit_turn_inner(
    controller: &TurnController,
    sessions: &SessionRegistry,
    id: Uuid,
    req: TurnRequest,
) -> HttpResponse {
    let Some(session) = sessions.get(id).await else {
        return session_not_found(id);
    };
    let text = req.text.unwrap_or_default();

    match controller.submit_turn(&session, &text).await {
        Ok(outcome) => (StatusCode::OK, serde_json::json!(outcome)),
        Err(e) => turn_error_response(&e),
    }
}

pub async fn summary_inner(
    controller: &TurnController,
    sessions: &SessionRegistry,
    id: Uuid,
) -> HttpResponse {
    let Some(session) = sessions.get(id).await else {
        return session_not_found(id);
    };

    match controller.request_summary(&session).await {
        Ok(summary) => (
            StatusCode::OK,
            serde_json::json!({
                "summary": summary,
                "status": SessionStatus::Completed,
            }),
        ),
        Err(e) => turn_error_response(&e),
    }
}

/// Consume a completed session into an intake draft. The session is
/// discarded on success.
pub async fn handoff_inner(sessions: &SessionRegistry, id: Uuid) -> HttpResponse {
    let Some(session) = sessions.get(id).await else {
        return session_not_found(id);
    };
    let snapshot = session.lock().await.clone();

    match IntakeDraft::from_session(snapshot) {
        Ok(draft) => {
            sessions.remove(id).await;
            tracing::info!(session = %id, "Intake session handed off");
            (StatusCode::OK, serde_json::json!(draft))
        }
        Err(e) => turn_error_response(&TurnError::Validation(e)),
    }
}

pub async fn create_incident_inner(
    pool: &PgPool,
    caller: Option<Uuid>,
    incident: NewIncident,
) -> HttpResponse {
    match store::create(pool, caller, incident).await {
        Ok(record) => (StatusCode::CREATED, serde_json::json!(record)),
        Err(e) => store_error_response(e),
    }
}

pub async fn list_incidents_inner(pool: &PgPool, caller: Option<Uuid>) -> HttpResponse {
    let caller = match require_caller(caller) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let filter = match store::is_authority(pool, caller).await {
        Ok(true) => None,
        Ok(false) => Some(caller),
        Err(e) => return store_error_response(e),
    };

    match store::list(pool, filter).await {
        Ok(records) => (
            StatusCode::OK,
            serde_json::json!({
                "count": records.len(),
                "incidents": records,
            }),
        ),
        Err(e) => store_error_response(e),
    }
}

pub async fn get_incident_inner(pool: &PgPool, caller: Option<Uuid>, id: Uuid) -> HttpResponse {
    let caller = match require_caller(caller) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let record = match store::get(pool, id).await {
        Ok(r) => r,
        Err(e) => return store_error_response(e),
    };

    if record.user_id != Some(caller) {
        match store::is_authority(pool, caller).await {
            Ok(true) => {}
            Ok(false) => {
                return error_response(StatusCode::FORBIDDEN, "not allowed to view this incident")
            }
            Err(e) => return store_error_response(e),
        }
    }

    (StatusCode::OK, serde_json::json!(record))
}

pub async fn update_incident_inner(
    pool: &PgPool,
    caller: Option<Uuid>,
    id: Uuid,
    update: IncidentUpdate,
) -> HttpResponse {
    let caller = match require_caller(caller) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if update.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "nothing to update: provide description or location",
        );
    }

    match store::get(pool, id).await {
        Ok(record) if record.user_id == Some(caller) => {}
        Ok(_) => return error_response(StatusCode::FORBIDDEN, "only the reporter can edit an incident"),
        Err(e) => return store_error_response(e),
    }

    match store::update_details(pool, id, update).await {
        Ok(record) => (StatusCode::OK, serde_json::json!(record)),
        Err(e) => store_error_response(e),
    }
}

pub async fn update_status_inner(
    pool: &PgPool,
    caller: Option<Uuid>,
    id: Uuid,
    req: StatusRequest,
) -> HttpResponse {
    let status: IncidentStatus = match req.status.trim().parse() {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{}", e)),
    };
    if let Err(resp) = require_authority(pool, caller).await {
        return resp;
    }

    match store::update_status(pool, id, status, Utc::now()).await {
        Ok(record) => (StatusCode::OK, serde_json::json!(record)),
        Err(e) => store_error_response(e),
    }
}

pub async fn hotspots_inner(pool: &PgPool, caller: Option<Uuid>) -> HttpResponse {
    if let Err(resp) = require_authority(pool, caller).await {
        return resp;
    }

    match store::list(pool, None).await {
        Ok(records) => {
            let hotspots = hotspots::cluster(&records);
            (
                StatusCode::OK,
                serde_json::json!({
                    "count": hotspots.len(),
                    "hotspots": hotspots,
                }),
            )
        }
        Err(e) => store_error_response(e),
    }
}

pub async fn evidence_inner(
    evidence: &EvidenceStore,
    caller: Option<Uuid>,
    content_type: Option<&str>,
    data: &[u8],
) -> HttpResponse {
    let Some(content_type) = content_type.filter(|c| !c.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "content-type header is required");
    };

    match evidence.store(caller, content_type, data).await {
        Ok(key) => (
            StatusCode::CREATED,
            serde_json::json!({
                "key": key,
                "bytes": data.len(),
            }),
        ),
        Err(e) => evidence_error_response(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatEndpointRequest>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(
        state.backend.as_ref(),
        state.controller.profile(),
        state.turn_timeout(),
        req,
    )
    .await;
    (status, Json(body))
}

pub async fn create_session_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = create_session_inner(&state.sessions, &state.config).await;
    (status, Json(body))
}

pub async fn get_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_session_inner(&state.sessions, id).await;
    (status, Json(body))
}

pub async fn submit_turn_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<TurnRequest>,
) -> impl IntoResponse {
    let (status, body) = submit_turn_inner(&state.controller, &state.sessions, id, req).await;
    (status, Json(body))
}

pub async fn summary_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = summary_inner(&state.controller, &state.sessions, id).await;
    (status, Json(body))
}

pub async fn handoff_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = handoff_inner(&state.sessions, id).await;
    (status, Json(body))
}

pub async fn create_incident_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(incident): Json<NewIncident>,
) -> impl IntoResponse {
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => create_incident_inner(&state.pool, caller, incident).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

pub async fn list_incidents_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => list_incidents_inner(&state.pool, caller).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

pub async fn hotspots_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => hotspots_inner(&state.pool, caller).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

pub async fn get_incident_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => get_incident_inner(&state.pool, caller, id).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

pub async fn update_incident_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<IncidentUpdate>,
) -> impl IntoResponse {
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => update_incident_inner(&state.pool, caller, id, update).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

pub async fn update_status_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> impl IntoResponse {
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => update_status_inner(&state.pool, caller, id, req).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

pub async fn evidence_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let (status, body) = match caller_id(&headers) {
        Ok(caller) => evidence_inner(&state.evidence, caller, content_type, &body).await,
        Err(resp) => resp,
    };
    (status, Json(body))
}

// ============================================================================
// Unit Tests - call inner functions directly
// ============================================================================
