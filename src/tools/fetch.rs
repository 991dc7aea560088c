//! 页面抓取能力：HTTP GET + 段落正文抽取
//!
//! PageFetcher 只负责取回响应体（非 2xx 视为失败）；FetchPageTool 把正文裁剪为段落文本，
//! 并把「本次运行选中的来源」写入调用方持有的 SourceSlot，而不是任何全局状态。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::tools::Tool;

/// 抓取能力：GET(url) -> 响应体
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, String>;
}

/// 基于 reqwest 的抓取实现
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", url, e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {} from {}", resp.status(), url));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body from {}: {}", url, e))?;
        // 去除 BOM，避免 HTML 检测失败
        Ok(body.strip_prefix('\u{FEFF}').map(str::to_string).unwrap_or(body))
    }
}

/// 判断内容是否像 HTML
pub fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head")))
}

/// 抽取所有 <p> 的文本并按行拼接；没有段落时回退到 html2text 的整页可读文本
pub fn paragraph_text(body: &str) -> String {
    if !looks_like_html(body) {
        return body.trim().to_string();
    }
    let doc = Html::parse_document(body);
    let paragraphs: Vec<String> = match Selector::parse("p") {
        Ok(sel) => doc
            .select(&sel)
            .map(|p| p.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    };
    if paragraphs.is_empty() {
        readable_text(body)
    } else {
        paragraphs.join("\n")
    }
}

/// 整页可读文本（去除标签、脚本）
pub fn readable_text(body: &str) -> String {
    match html2text::from_read(body.as_bytes(), 120) {
        Ok(text) => text.trim().to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// 超过 max_chars 时截断并追加标记
pub fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

/// 单次运行内成功抓取的页面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    pub url: String,
    pub text: String,
}

#[derive(Debug, Default)]
struct SlotState {
    last_success: Option<FetchedSource>,
    last_failure: Option<String>,
}

/// 与一次 Extract 调用绑定的来源记录；克隆共享同一份状态
#[derive(Debug, Clone, Default)]
pub struct SourceSlot {
    state: Arc<Mutex<SlotState>>,
}

impl SourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SlotState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// 记录成功抓取；多次抓取时以最后一次为准
    pub fn record_success(&self, url: &str, text: &str) {
        self.with_state(|s| {
            s.last_success = Some(FetchedSource {
                url: url.to_string(),
                text: text.to_string(),
            })
        });
    }

    pub fn record_failure(&self, error: &str) {
        self.with_state(|s| s.last_failure = Some(error.to_string()));
    }

    pub fn source(&self) -> Option<FetchedSource> {
        self.with_state(|s| s.last_success.clone())
    }

    pub fn last_failure(&self) -> Option<String> {
        self.with_state(|s| s.last_failure.clone())
    }
}

/// fetch_page 工具：抓取 URL 并返回段落文本，同时写入绑定的 SourceSlot
pub struct FetchPageTool {
    fetcher: Arc<dyn PageFetcher>,
    slot: SourceSlot,
    max_chars: usize,
}

impl FetchPageTool {
    pub fn new(fetcher: Arc<dyn PageFetcher>, slot: SourceSlot, max_chars: usize) -> Self {
        Self {
            fetcher,
            slot,
            max_chars,
        }
    }
}

#[async_trait]
impl Tool for FetchPageTool {
    fn name(&self) -> &str {
        "fetch_page"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its paragraph text. Args: {\"url\": \"https://...\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute http(s) URL of the page to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("").trim();
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            let err = format!("Unsupported URL scheme: {}", url);
            self.slot.record_failure(&err);
            return Err(err);
        }
        tracing::info!(url = %url, "fetch_page");
        match self.fetcher.fetch(url).await {
            Ok(body) => {
                let text = truncate_chars(paragraph_text(&body), self.max_chars);
                self.slot.record_success(url, &text);
                Ok(text)
            }
            Err(e) => {
                self.slot.record_failure(&e);
                Err(e)
            }
        }
    }
}
