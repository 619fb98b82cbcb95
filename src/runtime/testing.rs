//! Mock implementations for testing
//!
//! These mocks enable runtime tests without a database, a model provider or
//! network access.

use super::traits::{CheckpointStore, LlmClient, ToolExecutor};
use crate::db::{Message, StoredMessage, ToolCall};
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, ToolDefinition, Usage};
use crate::tools::{CalculatorTool, ToolContext, ToolDispatcher, ToolRegistry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    /// Record of all requests made
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse {
            content: vec![ContentBlock::text(text)],
            end_turn: true,
            usage: Usage::default(),
        });
    }

    pub fn queue_empty(&self) {
        self.queue_response(LlmResponse {
            content: vec![],
            end_turn: true,
            usage: Usage::default(),
        });
    }

    /// Queue a reply requesting `calls`, optionally with text
    pub fn queue_tools(&self, text: Option<String>, calls: Vec<ToolCall>) {
        let mut content: Vec<ContentBlock> = text.into_iter().map(ContentBlock::text).collect();
        content.extend(
            calls
                .iter()
                .map(|c| ContentBlock::tool_use(&c.id, &c.name, c.arguments_value())),
        );
        self.queue_response(LlmResponse {
            content,
            end_turn: false,
            usage: Usage::default(),
        });
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Delay every response, for cancellation tests
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Tool executor backed by a real dispatcher, recording every call
pub struct MockToolExecutor {
    dispatcher: ToolDispatcher,
    delay: Option<Duration>,
    calls: Mutex<Vec<ToolCall>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            dispatcher: ToolDispatcher::new(Arc::new(ToolRegistry::with_tools(vec![]))),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_calculator(mut self) -> Self {
        self.dispatcher = ToolDispatcher::new(Arc::new(ToolRegistry::with_tools(vec![Arc::new(
            CalculatorTool,
        )])));
        self
    }

    /// Sleep before running each round
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn recorded_calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn run(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Message> {
        self.calls.lock().unwrap().extend(calls.iter().cloned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.dispatcher.run(calls, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.dispatcher.registry().definitions()
    }
}

// ============================================================================
// In-Memory Checkpoint Store
// ============================================================================

/// Checkpoint store kept in a map
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Vec<StoredMessage>>>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    /// Make every append fail, simulating a broken database
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, session_id: &str) -> Result<Vec<StoredMessage>, String> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<Vec<StoredMessage>, String> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err("disk I/O error".to_string());
        }
        let mut sessions = self.sessions.lock().unwrap();
        let history = sessions.entry(session_id.to_string()).or_default();
        let mut next = history.last().map_or(1, |m| m.sequence_id + 1);
        let stored: Vec<StoredMessage> = messages
            .iter()
            .map(|message| {
                let stored = StoredMessage {
                    message_id: uuid::Uuid::new_v4().to_string(),
                    session_id: session_id.to_string(),
                    sequence_id: next,
                    message: message.clone(),
                    created_at: Utc::now(),
                };
                next += 1;
                stored
            })
            .collect();
        history.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, String> {
        let mut ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn clear_all(&self) -> Result<(), String> {
        self.sessions.lock().unwrap().clear();
        Ok(())
    }
}
