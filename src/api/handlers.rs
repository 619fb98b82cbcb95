//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    CancelResponse, ChatRequest, ChatResponse, ErrorResponse, ModelsResponse, RenameRequest,
    SessionListResponse, SessionResponse, SessionSummary, SessionWithMessagesResponse,
    SuccessResponse,
};
use super::AppState;
use crate::db::DbError;
use crate::runtime::SseEvent;
use crate::tools::ToolDescription;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session listing and creation
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/new", post(create_session))
        .route("/api/sessions/clear", post(clear_sessions))
        // Session retrieval and streaming
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/api/sessions/:id/rename", post(rename_session))
        // Turns
        .route("/api/sessions/:id/chat", post(send_chat))
        .route("/api/sessions/:id/cancel", post(cancel_turn))
        // Catalogues
        .route("/api/tools", get(list_tools))
        .route("/api/models", get(list_models))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Sessions
// ============================================================

async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = state
        .runtime
        .db()
        .list_sessions()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SessionListResponse {
        sessions: sessions.into_iter().map(SessionSummary::from).collect(),
    }))
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let session = state
        .runtime
        .db()
        .create_session(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(session_id = %id, "Created session");
    Ok(Json(SessionResponse { session }))
}

async fn clear_sessions(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .runtime
        .clear_all()
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Title is empty".to_string()));
    }

    let db = state.runtime.db();
    db.get_session(&id).map_err(AppError::from)?;
    db.set_title(&id, title)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let session = db.get_session(&id).map_err(AppError::from)?;

    Ok(Json(SessionResponse { session }))
}

#[derive(Debug, Deserialize)]
struct GetSessionQuery {
    after_sequence: Option<i64>,
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GetSessionQuery>,
) -> Result<Json<SessionWithMessagesResponse>, AppError> {
    let db = state.runtime.db();
    let session = db.get_session(&id).map_err(AppError::from)?;

    let messages = if let Some(after) = query.after_sequence {
        db.load_messages_after(&id, after)
    } else {
        db.load_messages(&id)
    }
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SessionWithMessagesResponse { session, messages }))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.runtime.db().get_session(&id).map_err(AppError::from)?;

    // Subscribe before reading history so nothing falls in between
    let broadcast_rx = state.runtime.subscribe(&id).await;

    let messages = state
        .runtime
        .db()
        .load_messages(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let last_sequence_id = messages.last().map_or(0, |m| m.sequence_id);

    let init = SseEvent::Init {
        session: serde_json::to_value(&session).unwrap_or(Value::Null),
        messages: messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect(),
        last_sequence_id,
    };

    Ok(sse_stream(init, broadcast_rx))
}

// ============================================================
// Turns
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }

    let outcome = state
        .runtime
        .run_turn(&id, req.text)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse::from(outcome)))
}

async fn cancel_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.runtime.cancel(&id).await;
    Json(CancelResponse { cancelled })
}

// ============================================================
// Catalogues
// ============================================================

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescription>> {
    Json(state.runtime.tool_registry().describe())
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.llm_registry.available_model_info(),
        default: state.llm_registry.default_model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("toolchat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::SessionNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
