//! Centralized model definitions for all LLM providers
//!
//! Adding a model means adding a `ModelDef` here; the registry picks it up
//! when its provider is configured.

use super::openai::{OpenAIModel, OpenAIService};
use super::LlmService;
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Groq,
    OpenAI,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Groq => "Groq",
            Provider::OpenAI => "OpenAI",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "llama-3.1-8b-instant")
    pub id: &'static str,
    /// Provider for this model
    pub provider: Provider,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Provider-side model this definition instantiates
    pub model: OpenAIModel,
}

impl ModelDef {
    /// Instantiate the service for this model
    pub fn create(&self, api_key: &str, gateway: Option<&str>) -> Result<Arc<dyn LlmService>, String> {
        if api_key.is_empty() {
            return Err(format!(
                "{} requires {} or gateway",
                self.id,
                self.provider.api_key_env_var()
            ));
        }
        Ok(Arc::new(OpenAIService::new(
            api_key.to_string(),
            self.model,
            gateway,
        )))
    }
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        // Groq models
        ModelDef {
            id: "llama-3.1-8b-instant",
            provider: Provider::Groq,
            description: "Llama 3.1 8B on Groq (fast, default)",
            context_window: 128_000,
            model: OpenAIModel::Llama31_8bInstant,
        },
        ModelDef {
            id: "llama-3.3-70b-versatile",
            provider: Provider::Groq,
            description: "Llama 3.3 70B on Groq (more capable)",
            context_window: 128_000,
            model: OpenAIModel::Llama33_70bVersatile,
        },
        // OpenAI models
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            description: "GPT-4o mini (fast, efficient)",
            context_window: 128_000,
            model: OpenAIModel::GPT4oMini,
        },
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            description: "GPT-4o (balanced)",
            context_window: 128_000,
            model: OpenAIModel::GPT4o,
        },
    ]
}

/// Get the default model definition
pub fn default_model() -> &'static ModelDef {
    &all_models()[0]
}
