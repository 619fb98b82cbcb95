//! Runs the tool calls of one assistant message

use super::{ToolContext, ToolRegistry};
use crate::db::{Message, ToolCall};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

/// Executes requested tool calls against the registry.
///
/// Calls of one round run concurrently; results come back in call order.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run every call and return one `ToolResult` message per call
    pub async fn run(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Message> {
        let runs = calls.iter().map(|call| {
            let ctx = ctx.clone();
            async move {
                let start = Instant::now();
                let session_id = ctx.session_id.clone();
                let outcome = self
                    .registry
                    .invoke(&call.name, call.arguments_value(), ctx)
                    .await;
                tracing::info!(
                    session_id = %session_id,
                    tool = %call.name,
                    tool_call_id = %call.id,
                    duration_ms = %start.elapsed().as_millis(),
                    success = !outcome.is_failure(),
                    "Tool call finished"
                );
                Message::tool_result(call, outcome)
            }
        });

        join_all(runs).await
    }
}
