//! 阶段执行器：Discover / Extract / Synthesize
//!
//! 每个阶段只接收输入、返回输出，不触碰任务存储；所有状态写入由编排器完成。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::agent::{AgentRunner, AgentSpec};
use crate::config::InstructionsSection;
use crate::core::AgentError;
use crate::task::Extraction;
use crate::tools::{FetchPageTool, PageFetcher, SourceSlot, Tool, ToolExecutor, ToolRegistry};

/// 三个阶段的执行接口
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// 开放式检索，返回非结构化发现
    async fn discover(&self, query: &str) -> Result<String, AgentError>;

    /// 从发现中选定一个来源并抓取其正文
    async fn extract(&self, query: &str, findings: &str) -> Result<Extraction, AgentError>;

    /// 把抽取文本加工为最终教程
    async fn synthesize(&self, extracted_text: &str) -> Result<String, AgentError>;
}

/// Extract 阶段要求 LLM 给出的结构化答案
#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractReport {
    /// Text gathered from the fetched page that is relevant to the request
    extracted_text: String,
}

/// 基于 AgentRunner 的阶段实现
pub struct AgentStages {
    runner: AgentRunner,
    fetcher: Arc<dyn PageFetcher>,
    search: Option<Arc<dyn Tool>>,
    instructions: InstructionsSection,
    tool_timeout_secs: u64,
    max_chars: usize,
}

impl AgentStages {
    pub fn new(runner: AgentRunner, fetcher: Arc<dyn PageFetcher>, instructions: InstructionsSection) -> Self {
        Self {
            runner,
            fetcher,
            search: None,
            instructions,
            tool_timeout_secs: 30,
            max_chars: 8000,
        }
    }

    /// Discover 阶段可用的搜索工具
    pub fn with_search(mut self, search: Arc<dyn Tool>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_limits(mut self, tool_timeout_secs: u64, max_chars: usize) -> Self {
        self.tool_timeout_secs = tool_timeout_secs;
        self.max_chars = max_chars;
        self
    }
}

#[async_trait]
impl StageExecutor for AgentStages {
    async fn discover(&self, query: &str) -> Result<String, AgentError> {
        let agent = AgentSpec::new("discover", self.instructions.discover.clone());
        let executor = self.search.as_ref().map(|search| {
            let mut registry = ToolRegistry::new();
            registry.register_arc(Arc::clone(search));
            ToolExecutor::new(registry, self.tool_timeout_secs)
        });
        self.runner.run(&agent, query, executor.as_ref()).await
    }

    async fn extract(&self, query: &str, findings: &str) -> Result<Extraction, AgentError> {
        // 每次调用独立的 SourceSlot：来源只归属于发起本次调用的任务
        let slot = SourceSlot::new();
        let mut registry = ToolRegistry::new();
        registry.register(FetchPageTool::new(
            Arc::clone(&self.fetcher),
            slot.clone(),
            self.max_chars,
        ));
        let executor = ToolExecutor::new(registry, self.tool_timeout_secs);

        let agent = AgentSpec::new("extract", self.instructions.extract.replace("{query}", query));
        let report: ExtractReport = self
            .runner
            .run_structured(&agent, findings, Some(&executor))
            .await?;

        let source = slot.source().ok_or_else(|| match slot.last_failure() {
            Some(e) => AgentError::FetchFailed(e),
            None => AgentError::NoSource,
        })?;

        let extracted_text = if report.extracted_text.trim().is_empty() {
            source.text
        } else {
            report.extracted_text
        };
        Ok(Extraction {
            source_reference: source.url,
            extracted_text,
        })
    }

    async fn synthesize(&self, extracted_text: &str) -> Result<String, AgentError> {
        let agent = AgentSpec::new("synthesize", self.instructions.synthesize.clone());
        self.runner.run(&agent, extracted_text, None).await
    }
}
