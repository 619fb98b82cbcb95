//! Model registry for managing available LLM providers

use super::models::default_model as preferred_model;
use super::{all_models, LlmService, LoggingService, ModelDef, Provider};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub groq_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible gateway base URL (e.g. `http://localhost:4000/v1`)
    pub gateway: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            groq_api_key: std::env::var("GROQ_API_KEY").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
        }
    }
}

/// Model metadata exposed to clients
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub description: String,
    pub context_window: usize,
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    /// Create an empty registry for testing purposes
    #[allow(dead_code)] // Used in tests
    pub fn new_empty() -> Self {
        Self {
            services: HashMap::new(),
            default_model: "test-model".to_string(),
        }
    }

    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        for model_def in all_models() {
            if let Some(service) = Self::try_create_model(model_def, config) {
                services.insert(model_def.id.to_string(), service);
            }
        }

        let default_model = config
            .default_model
            .clone()
            .or_else(|| {
                let preferred = preferred_model().id;
                if services.contains_key(preferred) {
                    Some(preferred.to_string())
                } else {
                    // First available model in table order
                    all_models()
                        .iter()
                        .find(|def| services.contains_key(def.id))
                        .map(|def| def.id.to_string())
                }
            })
            .unwrap_or_else(|| preferred_model().id.to_string());

        Self {
            services,
            default_model,
        }
    }

    /// Try to create a model service, validating prerequisites
    fn try_create_model(model_def: &ModelDef, config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
        // In gateway mode the gateway handles authentication
        let api_key = if config.gateway.is_some() {
            "implicit".to_string()
        } else {
            match model_def.provider {
                Provider::Groq => config.groq_api_key.as_ref()?,
                Provider::OpenAI => config.openai_api_key.as_ref()?,
            }
            .clone()
        };

        match model_def.create(&api_key, config.gateway.as_deref()) {
            Ok(service) => Some(Arc::new(LoggingService::new(service))),
            Err(e) => {
                tracing::debug!(model = model_def.id, error = %e, "Model unavailable");
                None
            }
        }
    }

    /// Register a service under an id (tests and custom providers)
    #[allow(dead_code)] // Used in tests
    pub fn insert(&mut self, model_id: impl Into<String>, service: Arc<dyn LlmService>) {
        let model_id = model_id.into();
        if self.services.is_empty() {
            self.default_model.clone_from(&model_id);
        }
        self.services.insert(model_id, service);
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    /// Get detailed information about available models
    pub fn available_model_info(&self) -> Vec<ModelInfo> {
        all_models()
            .iter()
            .filter(|def| self.services.contains_key(def.id))
            .map(|def| ModelInfo {
                id: def.id.to_string(),
                provider: def.provider.display_name().to_string(),
                description: def.description.to_string(),
                context_window: def.context_window,
            })
            .collect()
    }

    /// Check if any models are available
    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }

    /// Get a cheap/fast model for auxiliary tasks like title generation.
    /// Prefers: llama-3.1-8b-instant > gpt-4o-mini > the default model
    pub fn get_cheap_model(&self) -> Option<Arc<dyn LlmService>> {
        const CHEAP_MODELS: &[&str] = &["llama-3.1-8b-instant", "gpt-4o-mini"];

        CHEAP_MODELS
            .iter()
            .find_map(|model_id| self.get(model_id))
            .or_else(|| self.default())
    }
}
