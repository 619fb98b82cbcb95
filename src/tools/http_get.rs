//! HTTP GET tool

use super::{parse_input, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_CHARS: usize = 8_000;

/// Fetch a URL and return its (truncated) body
pub struct HttpGetTool {
    client: Client,
}

impl HttpGetTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("toolchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for HttpGetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HttpGetInput {
    url: String,
    #[serde(default)]
    max_chars: Option<usize>,
}

/// Keep at most `max_chars` characters
fn truncate_chars(body: &str, max_chars: usize) -> (String, bool) {
    match body.chars().nth(max_chars) {
        Some(_) => (body.chars().take(max_chars).collect(), true),
        None => (body.to_string(), false),
    }
}

#[async_trait]
impl Tool for HttpGetTool {
    fn name(&self) -> &'static str {
        "http_get"
    }

    fn description(&self) -> String {
        "Fetch a web page or API endpoint with an HTTP GET request and return the status and response body (truncated).".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": {"type": "string", "description": "Absolute http(s) URL"},
                "max_chars": {"type": "integer", "description": "Maximum body characters to return (default 8000)"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let input: HttpGetInput = parse_input(input)?;
        let url = reqwest::Url::parse(&input.url)
            .map_err(|e| ToolError::invalid_input(format!("invalid url '{}': {e}", input.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::invalid_input(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        let max_chars = input.max_chars.unwrap_or(DEFAULT_MAX_CHARS);
        // A UTF-8 character is at most four bytes
        let max_bytes = max_chars.saturating_add(1).saturating_mul(4);

        let fetch = async {
            let mut response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ToolError::execution(format!("request failed: {e}")))?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let mut bytes = Vec::new();
            while bytes.len() < max_bytes {
                let chunk = response
                    .chunk()
                    .await
                    .map_err(|e| ToolError::execution(format!("failed to read body: {e}")))?;
                match chunk {
                    Some(chunk) => bytes.extend_from_slice(&chunk),
                    None => break,
                }
            }
            Ok::<_, ToolError>((status, content_type, bytes))
        };

        let (status, content_type, bytes) = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(ToolError::execution("cancelled")),
            result = fetch => result?,
        };

        if !status.is_success() {
            return Err(ToolError::execution(format!("HTTP {status} from {url}")));
        }

        let (body, truncated) = truncate_chars(&String::from_utf8_lossy(&bytes), max_chars);

        Ok(json!({
            "url": url.as_str(),
            "status": status.as_u16(),
            "content_type": content_type,
            "body": body,
            "truncated": truncated,
        }))
    }
}
