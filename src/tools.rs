//! Tool implementations for toolchat
//!
//! Tools are stateless singletons; everything a call needs arrives through
//! `ToolContext`. The registry is the error boundary: whatever a tool does,
//! `invoke` hands back a `ToolOutcome`.

mod calculator;
mod dispatcher;
mod files;
mod http_get;
mod math;
mod web_search;

pub use calculator::CalculatorTool;
pub use dispatcher::ToolDispatcher;
pub use files::{ReadFileTool, WriteFileTool};
pub use http_get::HttpGetTool;
pub use math::EvaluateMathTool;
pub use web_search::WebSearchTool;

use crate::db::ToolOutcome;
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised inside tools, rendered as `Failure` text by the registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Deserialize tool input, mapping schema violations to `InvalidInput`
pub fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

/// All context needed for a tool invocation.
///
/// Created fresh for each tool call.
#[derive(Clone)]
pub struct ToolContext {
    /// Cancellation signal for long-running operations
    pub cancel: CancellationToken,

    /// The session this tool is executing within
    pub session_id: String,

    /// Root directory for file operations
    pub working_dir: PathBuf,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, session_id: String, working_dir: PathBuf) -> Self {
        Self {
            cancel,
            session_id,
            working_dir,
        }
    }
}

/// Trait for tools that can be invoked by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool.
    ///
    /// Tools doing network or disk I/O should watch `ctx.cancel`.
    async fn run(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// One parameter in the tool description format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
}

/// A tool as described to the model and to API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub description: String,
}

/// Summarize a JSON schema's top-level properties
fn parameter_specs(schema: &Value) -> BTreeMap<String, ParameterSpec> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, prop)| {
                    let kind = prop
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("any")
                        .to_string();
                    let spec = ParameterSpec {
                        kind,
                        required: required.contains(&name.as_str()),
                    };
                    (name.clone(), spec)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed collection of tools available to every session
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create the standard tool set
    pub fn standard() -> Self {
        Self::with_tools(vec![
            Arc::new(CalculatorTool),
            Arc::new(EvaluateMathTool),
            Arc::new(WebSearchTool::new()),
            Arc::new(HttpGetTool::new()),
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
        ])
    }

    /// Create a registry from an explicit tool list
    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Describe every tool: name, parameter types and requiredness, description
    pub fn describe(&self) -> Vec<ToolDescription> {
        self.tools
            .iter()
            .map(|t| ToolDescription {
                name: t.name().to_string(),
                parameters: parameter_specs(&t.input_schema()),
                description: t.description(),
            })
            .collect()
    }

    /// Get all tool definitions for the model
    pub fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| crate::llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Invoke a tool by name.
    ///
    /// Never fails: unknown names, tool errors, cancellation and panics all
    /// come back as `ToolOutcome::Failure`.
    pub async fn invoke(&self, name: &str, input: Value, ctx: ToolContext) -> ToolOutcome {
        let Some(tool) = self.find(name) else {
            return ToolOutcome::failure(ToolError::UnknownTool(name.to_string()).to_string());
        };

        let cancel = ctx.cancel.clone();
        let run = AssertUnwindSafe(tool.run(input, ctx)).catch_unwind();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolError::execution("cancelled")),
            outcome = run => match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(tool = %name, panic = %message, "Tool panicked");
                    Err(ToolError::execution(format!("tool {name} crashed: {message}")))
                }
            },
        };

        match result {
            Ok(payload) => ToolOutcome::success(payload),
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}
