//! Web search tool backed by the Tavily search API.
//!
//! Needs a Tavily key (`TAVILY_API_KEY` or `tools.tavily_api_key` in the
//! config). Without one the tool reports itself as not configured and the
//! model sees the error instead of results.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use wayfarer_core::error::ToolError;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Tavily rejects longer queries.
pub const MAX_QUERY_CHARS: usize = 400;

/// Results requested per search.
pub const MAX_RESULTS: u32 = 5;

pub struct WebSearchTool {
    api_key: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    /// `timeout_secs == 0` keeps the client default.
    pub fn new(api_key: Option<String>, timeout_secs: u64) -> Self {
        let mut builder = reqwest::Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(std::time::Duration::from_secs(timeout_secs));
        }
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: TAVILY_URL.into(),
            client: builder.build().unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Performs a real-time web search to find the latest information. Use this for news, \
         restaurant recommendations, or current events."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query string"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let Some(api_key) = &self.api_key else {
            return Err(ToolError::NotConfigured {
                tool_name: self.name().into(),
                reason: "TAVILY_API_KEY is not set".into(),
            });
        };

        let query = truncate_query(query);
        info!(query, "web_search called");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "query": query,
                "search_depth": "basic",
                "max_results": MAX_RESULTS,
            }))
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("An unexpected error occurred during search: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Tavily returned an error");
            return Ok(ToolResult::failure(format!("Tavily API Error {}: {body}", status.as_u16())));
        }

        let parsed: TavilyResponse = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: format!("Failed to parse search response: {e}"),
        })?;

        Ok(ToolResult::text(format_results(&parsed.results)))
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// One Tavily result.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Cut a query to [`MAX_QUERY_CHARS`] characters.
pub fn truncate_query(query: &str) -> &str {
    match query.char_indices().nth(MAX_QUERY_CHARS) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}

/// Render hits as plain text blocks for the model.
pub fn format_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No search results found for this query.".into();
    }
    hits.iter()
        .map(|h| format!("Title: {}\nSource: {}\nContent: {}", h.title, h.url, h.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::state::State;

    #[test]
    fn query_is_truncated_on_char_boundary() {
        let long = "é".repeat(500);
        let cut = truncate_query(&long);
        assert_eq!(cut.chars().count(), MAX_QUERY_CHARS);

        assert_eq!(truncate_query("best vada pav in Dadar"), "best vada pav in Dadar");
    }

    #[test]
    fn formats_hits() {
        let hits = vec![
            SearchHit {
                title: "Ashok Vada Pav".into(),
                url: "https://example.com/ashok".into(),
                content: "Legendary stall near Kirti College.".into(),
            },
            SearchHit {
                title: "Shree Krishna".into(),
                url: "https://example.com/sk".into(),
                content: "Crisp and spicy.".into(),
            },
        ];
        let text = format_results(&hits);
        assert!(text.starts_with("Title: Ashok Vada Pav\nSource: https://example.com/ashok"));
        assert_eq!(text.matches("\n\n---\n\n").count(), 1);
    }

    #[test]
    fn empty_results_message() {
        assert_eq!(format_results(&[]), "No search results found for this query.");
    }

    #[test]
    fn parses_tavily_payload() {
        let parsed: TavilyResponse = serde_json::from_str(
            r#"{"query": "q", "results": [{"title": "T", "url": "U", "content": "C", "score": 0.9}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].url, "U");
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let tool = WebSearchTool::new(None, 5);
        let mut ctx = ToolContext::new("foodie_agent", "inv", State::new());
        let err = tool
            .execute(json!({"query": "biryani in Hyderabad"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotConfigured { .. }));
        assert!(err.to_string().contains("TAVILY_API_KEY"));
    }

    #[tokio::test]
    async fn blank_key_counts_as_missing() {
        let tool = WebSearchTool::new(Some("   ".into()), 5);
        let mut ctx = ToolContext::new("a", "inv", State::new());
        assert!(tool.execute(json!({"query": "x"}), &mut ctx).await.is_err());
    }
}
