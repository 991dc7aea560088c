//! web_search 工具：把查询拼到配置的搜索端点上，返回结果页的可读文本
//!
//! 仅供 Discover 阶段使用；端点由 [search] 配置决定，未配置时不注册该工具。

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::tools::fetch::{readable_text, truncate_chars, PageFetcher};
use crate::tools::Tool;

pub struct WebSearchTool {
    fetcher: Arc<dyn PageFetcher>,
    endpoint: String,
    query_param: String,
    max_chars: usize,
}

impl WebSearchTool {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        endpoint: impl Into<String>,
        query_param: impl Into<String>,
        max_chars: usize,
    ) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
            query_param: query_param.into(),
            max_chars,
        }
    }

    fn search_url(&self, query: &str) -> Result<Url, String> {
        Url::parse_with_params(&self.endpoint, &[(self.query_param.as_str(), query)])
            .map_err(|e| format!("Invalid search endpoint {}: {}", self.endpoint, e))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the result page as text. Args: {\"query\": \"...\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("").trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        let url = self.search_url(query)?;
        tracing::info!(url = %url, "web_search");
        let body = self.fetcher.fetch(url.as_str()).await?;
        Ok(truncate_chars(readable_text(&body), self.max_chars))
    }
}
