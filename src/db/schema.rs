//! Database schema and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// SQL schema for initialization
///
/// `sessions` is the title/metadata table, `messages` holds the checkpoints.
/// The two are not linked by a foreign key: appending to an
/// unknown session id creates its checkpoint stream on first use.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    message_type TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (session_id, sequence_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence_id);
";

/// Title every session starts with until the title generator replaces it
pub const DEFAULT_TITLE: &str = "New Chat";

/// Session metadata record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

// ============================================================
// Message Types
// ============================================================

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as a JSON object, the shape tools deserialize from
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Result of a single tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { error: String },
}

impl ToolOutcome {
    pub fn success(payload: impl Into<Value>) -> Self {
        Self::Success {
            payload: payload.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Text handed back to the model for this result
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Success {
                payload: Value::String(s),
            } => s.clone(),
            Self::Success { payload } => payload.to_string(),
            Self::Failure { error } => format!("Error: {error}"),
        }
    }
}

/// One entry of a session's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: ToolOutcome,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant { text, tool_calls }
    }

    pub fn tool_result(call: &ToolCall, result: ToolOutcome) -> Self {
        Self::ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::User { .. } => MessageType::User,
            Self::Assistant { .. } => MessageType::Assistant,
            Self::ToolResult { .. } => MessageType::Tool,
        }
    }

    /// Tool calls requested by an assistant message (empty for other kinds)
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            Self::User { .. } | Self::ToolResult { .. } => &[],
        }
    }

    /// Visible text of user and assistant messages
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { text } => Some(text.as_str()),
            Self::Assistant { text, .. } => text.as_deref(),
            Self::ToolResult { .. } => None,
        }
    }
}

/// Message type discriminator stored in its own column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::User => write!(f, "user"),
            MessageType::Assistant => write!(f, "assistant"),
            MessageType::Tool => write!(f, "tool"),
        }
    }
}

/// A persisted message with its position in the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub message_id: String,
    pub session_id: String,
    pub sequence_id: i64,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// Tool calls whose results never made it into the history.
///
/// Scans in order; a result clears the call it references.
pub fn orphaned_tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    let mut pending: Vec<ToolCall> = Vec::new();
    for message in messages {
        match message {
            Message::Assistant { tool_calls, .. } => pending.extend(tool_calls.iter().cloned()),
            Message::ToolResult { tool_call_id, .. } => {
                pending.retain(|call| &call.id != tool_call_id);
            }
            Message::User { .. } => {}
        }
    }
    pending
}

/// Check that every tool result answers exactly one earlier call and that
/// results of one assistant message follow its call order.
pub fn validate_history(messages: &[Message]) -> Result<(), String> {
    let mut seen_calls: HashSet<&str> = HashSet::new();
    let mut answered: HashSet<&str> = HashSet::new();
    let mut expected: Vec<&str> = Vec::new();

    for message in messages {
        match message {
            Message::Assistant { tool_calls, .. } => {
                expected.clear();
                for call in tool_calls {
                    if !seen_calls.insert(call.id.as_str()) {
                        return Err(format!("duplicate tool call id {}", call.id));
                    }
                    expected.push(call.id.as_str());
                }
            }
            Message::ToolResult { tool_call_id, .. } => {
                if !seen_calls.contains(tool_call_id.as_str()) {
                    return Err(format!("result for unknown tool call {tool_call_id}"));
                }
                if !answered.insert(tool_call_id.as_str()) {
                    return Err(format!("tool call {tool_call_id} answered twice"));
                }
                match expected.first() {
                    Some(next) if *next == tool_call_id.as_str() => {
                        expected.remove(0);
                    }
                    _ => return Err(format!("result for {tool_call_id} out of call order")),
                }
            }
            Message::User { .. } => expected.clear(),
        }
    }
    Ok(())
}

/// Give fresh ids to requested calls whose id is already taken.
///
/// An id is taken when an earlier message of `history` used it or an
/// earlier call in `calls` did. Returns how many ids were replaced.
pub fn dedupe_tool_call_ids(history: &[Message], calls: &mut [ToolCall]) -> usize {
    let mut taken: HashSet<String> = history
        .iter()
        .flat_map(|m| m.tool_calls().iter().map(|c| c.id.clone()))
        .collect();
    let mut replaced = 0;
    for call in calls.iter_mut() {
        if !taken.insert(call.id.clone()) {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            taken.insert(call.id.clone());
            replaced += 1;
        }
    }
    replaced
}
