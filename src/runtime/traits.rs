//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, Message, StoredMessage, ToolCall};
use crate::llm::{LlmError, LlmRequest, LlmResponse, ModelRegistry, ToolDefinition};
use crate::tools::{ToolContext, ToolDispatcher};
use async_trait::async_trait;
use std::sync::Arc;

/// Append-only message storage keyed by session
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Full message sequence of a session, empty for unknown ids
    async fn load(&self, session_id: &str) -> Result<Vec<StoredMessage>, String>;

    /// Append messages atomically, returning them with their sequence ids
    async fn append(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<Vec<StoredMessage>, String>;

    async fn list_session_ids(&self) -> Result<Vec<String>, String>;

    /// Drop every checkpoint of every session
    async fn clear_all(&self) -> Result<(), String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;
}

/// Runs the tool calls of one round
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// One `ToolResult` message per call, in call order
    async fn run(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Message>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<ToolDefinition>;
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a checkpoint store
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for DatabaseStorage {
    async fn load(&self, session_id: &str) -> Result<Vec<StoredMessage>, String> {
        self.db.load_messages(session_id).map_err(|e| e.to_string())
    }

    async fn append(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<Vec<StoredMessage>, String> {
        self.db
            .append_messages(session_id, messages)
            .map_err(|e| e.to_string())
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, String> {
        self.db.list_session_ids().map_err(|e| e.to_string())
    }

    async fn clear_all(&self) -> Result<(), String> {
        self.db.clear_checkpoints().map_err(|e| e.to_string())
    }
}

/// Adapter to use ModelRegistry as LlmClient
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::network("No LLM available"))?;
        llm.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Adapter to use the tool dispatcher as ToolExecutor
pub struct ToolRegistryExecutor {
    dispatcher: ToolDispatcher,
}

impl ToolRegistryExecutor {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn run(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Message> {
        self.dispatcher.run(calls, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.dispatcher.registry().definitions()
    }
}
