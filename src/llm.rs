//! Model gateway
//!
//! A turn asks the gateway for the next assistant message given the session
//! history and the tool definitions. Provider and network failures come
//! back as [`LlmError`]; a reply without tool calls is always a real answer.

mod error;
mod models;
mod openai;
mod registry;
mod types;

#[cfg(test)]
mod proptests;

pub use error::{LlmError, LlmErrorKind};
pub use models::{all_models, ModelDef, Provider};
pub use registry::{LlmConfig, ModelInfo, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// One chat model reachable through the gateway
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Produce the next assistant message for `request`
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;

    /// Context window size in tokens
    fn context_window(&self) -> usize;
}

/// Records every gateway call: outcome, latency, tokens and what the model
/// asked for.
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration_ms = start.elapsed().as_millis();

        match &result {
            Ok(response) => tracing::info!(
                model = %self.model_id,
                duration_ms = %duration_ms,
                history_len = request.messages.len(),
                tools_offered = request.tools.len(),
                tool_calls = response.tool_uses().len(),
                has_text = !response.text().is_empty(),
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Gateway call completed"
            ),
            Err(e) if e.kind.is_retryable() => tracing::warn!(
                model = %self.model_id,
                duration_ms = %duration_ms,
                kind = ?e.kind,
                error = %e.message,
                "Gateway unavailable, retryable"
            ),
            Err(e) => tracing::error!(
                model = %self.model_id,
                duration_ms = %duration_ms,
                kind = ?e.kind,
                error = %e.message,
                "Gateway call failed"
            ),
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn context_window(&self) -> usize {
        self.inner.context_window()
    }
}
