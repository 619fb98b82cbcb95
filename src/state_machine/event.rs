//! Events that can occur in a conversation

use super::state::ErrorKind;
use crate::db::{Message, ToolCall};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },
    UserCancel,

    // Gateway events
    ModelResponse {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ModelError {
        message: String,
        kind: ErrorKind,
    },

    // Dispatcher events
    /// One `ToolResult` message per pending call, in call order
    ToolResults {
        results: Vec<Message>,
    },
}

impl Event {
    pub fn user_message(text: impl Into<String>) -> Self {
        Event::UserMessage { text: text.into() }
    }
}
