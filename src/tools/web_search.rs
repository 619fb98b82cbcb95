//! Web search tool backed by the DuckDuckGo instant answer API

use super::{parse_input, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RESULTS: usize = 5;

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Point the tool at another instant-answer compatible endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchInput {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractSource", default)]
    abstract_source: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "Answer", default)]
    answer: Value,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a topic or a named group of topics
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics", default)]
        topics: Vec<RelatedTopic>,
    },
}

fn flatten_topics(topics: &[RelatedTopic], out: &mut Vec<Value>, max: usize) {
    for topic in topics {
        if out.len() >= max {
            return;
        }
        match topic {
            RelatedTopic::Topic { text, first_url } if !text.is_empty() => {
                out.push(json!({"text": text, "url": first_url}));
            }
            RelatedTopic::Topic { .. } => {}
            RelatedTopic::Group { topics } => flatten_topics(topics, out, max),
        }
    }
}

/// Reduce an instant answer to what the model needs
fn summarize(query: &str, answer: &InstantAnswer, max_results: usize) -> Value {
    let mut results = Vec::new();
    flatten_topics(&answer.related_topics, &mut results, max_results);

    let direct_answer = match &answer.answer {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    let found = !answer.abstract_text.is_empty() || direct_answer.is_some() || !results.is_empty();

    json!({
        "query": query,
        "found": found,
        "heading": answer.heading,
        "answer": direct_answer,
        "abstract": answer.abstract_text,
        "source": answer.abstract_source,
        "url": answer.abstract_url,
        "results": results,
    })
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> String {
        "Search the web for facts, definitions and current information. Returns a summary and related results with links.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "max_results": {"type": "integer", "description": "Maximum related results (default 5)"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let input: WebSearchInput = parse_input(input)?;
        let query = input.query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid_input("query is empty"));
        }

        let request = self.client.get(&self.endpoint).query(&[
            ("q", query),
            ("format", "json"),
            ("no_html", "1"),
            ("skip_disambig", "1"),
        ]);

        let fetch = async {
            let response = request
                .send()
                .await
                .map_err(|e| ToolError::execution(format!("search request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ToolError::execution(format!(
                    "search service returned HTTP {}",
                    response.status()
                )));
            }
            // The API serves JSON with a javascript content type
            let body = response
                .text()
                .await
                .map_err(|e| ToolError::execution(format!("failed to read search response: {e}")))?;
            serde_json::from_str::<InstantAnswer>(&body)
                .map_err(|e| ToolError::execution(format!("unexpected search response: {e}")))
        };

        let answer = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(ToolError::execution("cancelled")),
            result = fetch => result?,
        };

        tracing::debug!(
            session_id = %ctx.session_id,
            query = %query,
            related = answer.related_topics.len(),
            "Web search completed"
        );

        Ok(summarize(
            query,
            &answer,
            input.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        ))
    }
}
