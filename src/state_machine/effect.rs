//! Effects produced by state transitions

use crate::db::{Message, ToolCall};
use serde_json::Value;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append messages to the checkpoint store, in order
    PersistMessages { messages: Vec<Message> },

    /// Call the model gateway with the persisted history
    RequestModel { round: u32 },

    /// Run the tool calls of one assistant message
    DispatchTools { calls: Vec<ToolCall> },

    /// Notify connected clients
    NotifyClient { event_type: String, data: Value },
}

impl Effect {
    pub fn persist(message: Message) -> Self {
        Effect::PersistMessages {
            messages: vec![message],
        }
    }

    pub fn notify(event_type: impl Into<String>, data: Value) -> Self {
        Effect::NotifyClient {
            event_type: event_type.into(),
            data,
        }
    }
}
