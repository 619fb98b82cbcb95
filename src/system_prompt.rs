//! System prompt sent with every model request

/// Base instructions for the assistant
const BASE_PROMPT: &str = "You are a helpful assistant. \
Use tools only when the user explicitly asks for information that requires calling a tool. \
For greetings, casual chat, or explanations, respond normally without calling any tool. \
Think step-by-step and choose the simplest action.";

/// Build the system prompt, listing the tools the model may call
pub fn build_system_prompt(tool_names: &[&str]) -> String {
    if tool_names.is_empty() {
        return BASE_PROMPT.to_string();
    }
    format!(
        "{BASE_PROMPT}\n\nAvailable tools: {}.",
        tool_names.join(", ")
    )
}
