//! HTTP request layer for interview sessions.
//!
//! Two operations drive an interview: `start` idempotently spins up the
//! session's worker and returns the first question; `answer` delivers one
//! patient message and waits (bounded) for the next question or the final
//! outcome. A wait that elapses returns 408 and leaves the worker running,
//! the abandoned-worker behavior documented on `worker::spawn`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::runner::PipelineRunner;
use crate::session::{SessionRegistry, SessionStatus, TurnOutcome};
use crate::worker;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub runner: Arc<PipelineRunner>,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub question: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerResponse {
    Question { question: String },
    Completed { artifact: Option<String> },
    Failed { error: Option<String> },
}

#[derive(Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub status: SessionStatus,
    pub question: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Timeout(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Timeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions/{id}/start", post(start_session))
        .route("/api/sessions/{id}/answer", post(answer_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(cleanup_session),
        )
        .route("/health", get(health_check))
}

pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api_router().with_state(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Bind and serve until ctrl-c.
pub async fn start_server(state: SharedState, dev_mode: bool) -> anyhow::Result<()> {
    use anyhow::Context;

    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let app = build_router(state, dev_mode);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "intake server listening");
    println!("Intake server running at http://{local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn start_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<StartResponse>, ApiError> {
    let session = state.registry.get_or_create(&id);
    worker::spawn(
        Arc::clone(&state.registry),
        Arc::clone(&session),
        Arc::clone(&state.runner),
        &state.config.transcript_dir,
    );

    match session.await_turn(true, state.config.answer_timeout).await {
        TurnOutcome::Question(question) => Ok(Json(StartResponse {
            session_id: id,
            status: session.status(),
            question: Some(question),
        })),
        TurnOutcome::Completed { .. } | TurnOutcome::Failed { .. } => Ok(Json(StartResponse {
            session_id: id,
            status: session.status(),
            question: None,
        })),
        TurnOutcome::TimedOut => Err(ApiError::Timeout(
            "No question was produced within the wait window".to_string(),
        )),
    }
}

async fn answer_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("No active session {id}")))?;

    match session.answer(&req.message, state.config.answer_timeout).await {
        TurnOutcome::Question(question) => Ok(Json(AnswerResponse::Question { question })),
        TurnOutcome::Completed { artifact } => Ok(Json(AnswerResponse::Completed { artifact })),
        TurnOutcome::Failed { reason } => Ok(Json(AnswerResponse::Failed { error: reason })),
        // The worker is deliberately left running; it will consume the
        // delivered message whenever its stage gets there.
        TurnOutcome::TimedOut => Err(ApiError::Timeout(
            "The interviewer produced no new question within the wait window".to_string(),
        )),
    }
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("No active session {id}")))?;
    Ok(Json(SessionView {
        session_id: id,
        status: session.status(),
        question: session.broker.get_question(),
    }))
}

async fn cleanup_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> StatusCode {
    // Cleanup is idempotent; deleting an unknown session is not an error.
    state.registry.cleanup(&id);
    StatusCode::NO_CONTENT
}
