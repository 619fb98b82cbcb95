//! Session title generation using a fast/cheap LLM
//!
//! Generates a short title from the first user message of a session.

use crate::db::{Database, DbError, DbResult};
use crate::llm::{
    ContentBlock, LlmMessage, LlmRequest, LlmService, MessageRole, ModelRegistry, SystemContent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const TITLE_PROMPT: &str = "Return ONLY a concise chat title, MAX 4 words, no quotes.";

const TITLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TITLE_WORDS: usize = 4;
const MAX_TITLE_CHARS: usize = 30;
const MAX_PROMPT_CHARS: usize = 500;

/// Used when the model cannot produce a title
pub const FALLBACK_TITLE: &str = "New Conversation";

/// Generate a title for a session from its first message.
///
/// Never fails: errors, timeouts and empty output give [`FALLBACK_TITLE`].
pub async fn generate_title(message_text: &str, llm_service: Option<Arc<dyn LlmService>>) -> String {
    generate_title_within(message_text, llm_service, TITLE_TIMEOUT).await
}

async fn generate_title_within(
    message_text: &str,
    llm_service: Option<Arc<dyn LlmService>>,
    limit: Duration,
) -> String {
    let Some(llm_service) = llm_service else {
        tracing::debug!("No model available for title generation");
        return FALLBACK_TITLE.to_string();
    };

    let message: String = message_text.chars().take(MAX_PROMPT_CHARS).collect();
    let request = LlmRequest {
        system: vec![SystemContent::new(TITLE_PROMPT)],
        messages: vec![LlmMessage {
            role: MessageRole::User,
            content: vec![ContentBlock::text(message)],
        }],
        tools: vec![],
        max_tokens: Some(20),
    };

    match timeout(limit, llm_service.complete(&request)).await {
        Ok(Ok(response)) => clamp_title(&response.text()),
        Ok(Err(e)) => {
            tracing::warn!(error = %e.message, "Title generation LLM error");
            FALLBACK_TITLE.to_string()
        }
        Err(_) => {
            tracing::warn!("Title generation timed out");
            FALLBACK_TITLE.to_string()
        }
    }
}

/// Keep at most four words and 30 characters (27 plus "...")
fn clamp_title(raw: &str) -> String {
    let words: Vec<&str> = raw.split_whitespace().take(MAX_TITLE_WORDS).collect();
    let title = words.join(" ");
    if title.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let head: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        return format!("{head}...");
    }
    title
}

/// Generate and store a title unless the session already has one.
///
/// Returns whether a title was written. Missing sessions are not titled.
pub async fn assign_title(
    db: &Database,
    registry: &ModelRegistry,
    session_id: &str,
    first_message: &str,
) -> DbResult<bool> {
    match db.get_session(session_id) {
        Ok(session) if session.has_default_title() => {}
        Ok(_) | Err(DbError::SessionNotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    }
    let title = generate_title(first_message, registry.get_cheap_model()).await;
    let written = db.set_title_if_default(session_id, &title)?;
    if written {
        tracing::info!(session_id = %session_id, title = %title, "Session titled");
    }
    Ok(written)
}

/// Run [`assign_title`] in the background
pub fn spawn_title_generation(
    db: Database,
    registry: Arc<ModelRegistry>,
    session_id: String,
    first_message: String,
) {
    tokio::spawn(async move {
        if let Err(e) = assign_title(&db, &registry, &session_id, &first_message).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to store session title");
        }
    });
}
