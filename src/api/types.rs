//! API request and response types

use crate::db::{Session, StoredMessage};
use crate::llm::ModelInfo;
use crate::runtime::TurnOutcome;
use crate::state_machine::ConvState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Request to rename a session
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

/// One row of the session sidebar
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub message_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionSummary {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            title: session.title,
            message_count: session.message_count,
            updated_at: session.updated_at,
        }
    }
}

/// Response with a list of sessions
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Response with a single session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
}

/// Response with session and messages
#[derive(Debug, Serialize)]
pub struct SessionWithMessagesResponse {
    pub session: Session,
    pub messages: Vec<StoredMessage>,
}

/// How a turn ended, as reported to the client
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Done,
    Failed,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub outcome: TurnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state: ConvState,
    pub rounds: u32,
    pub messages: Vec<StoredMessage>,
}

impl From<TurnOutcome> for ChatResponse {
    fn from(outcome: TurnOutcome) -> Self {
        let status = if matches!(outcome.state, ConvState::Done { .. }) {
            TurnStatus::Done
        } else {
            TurnStatus::Failed
        };
        Self {
            outcome: status,
            answer: outcome.answer().map(str::to_string),
            error: outcome.error().map(str::to_string),
            rounds: outcome.state.rounds(),
            state: outcome.state,
            messages: outcome.messages,
        }
    }
}

/// Response for cancel action
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
