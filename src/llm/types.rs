//! Common types for LLM interactions

use crate::db::{Message, ToolCall};
use serde::{Deserialize, Serialize};

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Vec<SystemContent>,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Build a request from a stored conversation history
    pub fn from_history(
        system_prompt: &str,
        history: &[Message],
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            system: vec![SystemContent::new(system_prompt)],
            messages: history_to_llm_messages(history),
            tools,
            max_tokens: Some(4096),
        }
    }
}

/// System prompt content
#[derive(Debug, Clone)]
pub struct SystemContent {
    pub text: String,
}

impl SystemContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Message in conversation
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text { text: s.into() }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Tool definition
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub end_turn: bool,
    pub usage: Usage,
}

impl LlmResponse {
    /// Extract all tool use requests from the response
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// Get text content from the response
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Split into answer text and requested tool calls.
    ///
    /// Empty text becomes `None`; tool calls keep the order the model emitted.
    pub fn into_parts(self) -> (Option<String>, Vec<ToolCall>) {
        let text = self.text();
        let tool_calls = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall::new(id, name, input)),
                _ => None,
            })
            .collect();
        let text = if text.is_empty() { None } else { Some(text) };
        (text, tool_calls)
    }

}

/// Usage statistics
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Convert a stored history into provider-neutral messages.
///
/// Consecutive tool results are grouped into one user-role message, the
/// shape both chat-completions and content-block APIs accept.
pub fn history_to_llm_messages(history: &[Message]) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::new();

    for message in history {
        match message {
            Message::User { text } => messages.push(LlmMessage {
                role: MessageRole::User,
                content: vec![ContentBlock::text(text.clone())],
            }),
            Message::Assistant { text, tool_calls } => {
                let mut content = Vec::with_capacity(tool_calls.len() + 1);
                if let Some(text) = text.as_ref().filter(|t| !t.is_empty()) {
                    content.push(ContentBlock::text(text.clone()));
                }
                content.extend(tool_calls.iter().map(|call| {
                    ContentBlock::tool_use(&call.id, &call.name, call.arguments_value())
                }));
                messages.push(LlmMessage {
                    role: MessageRole::Assistant,
                    content,
                });
            }
            Message::ToolResult {
                tool_call_id,
                result,
                ..
            } => {
                let block =
                    ContentBlock::tool_result(tool_call_id, result.to_model_text(), result.is_failure());
                match messages.last_mut() {
                    Some(last)
                        if last.role == MessageRole::User
                            && last
                                .content
                                .iter()
                                .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                    {
                        last.content.push(block);
                    }
                    _ => messages.push(LlmMessage {
                        role: MessageRole::User,
                        content: vec![block],
                    }),
                }
            }
        }
    }

    messages
}
