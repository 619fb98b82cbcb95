//! Conversation state types

use crate::db::ToolCall;
use crate::llm::LlmErrorKind;
use serde::{Deserialize, Serialize};

/// Default number of gateway calls allowed in one turn
pub const DEFAULT_MAX_ROUNDS: u32 = 8;

/// Why a turn finished successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The model replied without requesting tools
    Answered,
    /// The tool-use budget ran out and a notice was appended instead
    RoundCapReached,
}

/// Classification of a failed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    ServerError,
    Auth,
    InvalidRequest,
    Unknown,
    /// The user cancelled the turn
    Cancelled,
}

impl From<LlmErrorKind> for ErrorKind {
    fn from(kind: LlmErrorKind) -> Self {
        match kind {
            LlmErrorKind::Network => ErrorKind::Network,
            LlmErrorKind::RateLimit => ErrorKind::RateLimit,
            LlmErrorKind::ServerError => ErrorKind::ServerError,
            LlmErrorKind::Auth => ErrorKind::Auth,
            LlmErrorKind::InvalidRequest => ErrorKind::InvalidRequest,
            LlmErrorKind::Unknown => ErrorKind::Unknown,
        }
    }
}

/// Conversation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for user input
    #[default]
    Idle,

    /// Gateway call for `round` in flight
    AwaitingModel { round: u32 },

    /// Tools of `round` running; results must come back for `pending`, in order
    AwaitingToolResults { round: u32, pending: Vec<ToolCall> },

    /// Turn finished
    Done { rounds: u32, reason: DoneReason },

    /// Turn failed; committed history is untouched
    Failed {
        message: String,
        error_kind: ErrorKind,
        rounds: u32,
    },
}

impl ConvState {
    /// A turn is in flight and new user messages must wait
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConvState::AwaitingModel { .. } | ConvState::AwaitingToolResults { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConvState::Done { .. } | ConvState::Failed { .. })
    }

    /// Gateway calls made so far in the current or last turn
    pub fn rounds(&self) -> u32 {
        match self {
            ConvState::Idle => 0,
            ConvState::AwaitingModel { round } | ConvState::AwaitingToolResults { round, .. } => {
                *round
            }
            ConvState::Done { rounds, .. } | ConvState::Failed { rounds, .. } => *rounds,
        }
    }

    /// Short name used in logs and SSE payloads
    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::AwaitingModel { .. } => "awaiting_model",
            ConvState::AwaitingToolResults { .. } => "awaiting_tool_results",
            ConvState::Done { .. } => "done",
            ConvState::Failed { .. } => "failed",
        }
    }
}

/// Fixed parameters of one session's runtime
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub session_id: String,
    pub model_id: String,
    /// Gateway calls allowed per turn, at least 1
    pub max_rounds: u32,
}

impl ConvContext {
    pub fn new(session_id: impl Into<String>, model_id: impl Into<String>, max_rounds: u32) -> Self {
        Self {
            session_id: session_id.into(),
            model_id: model_id.into(),
            max_rounds: max_rounds.max(1),
        }
    }
}
