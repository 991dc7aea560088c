//! 运行时装配：由配置创建 LLM、工具、阶段执行器与任务网关
//!
//! CLI 与 HTTP 服务共用。

use std::sync::Arc;

use anyhow::Context;

use crate::agent::AgentRunner;
use crate::config::AppConfig;
use crate::gateway::TaskGateway;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::persistence::create_record_sink;
use crate::pipeline::{AgentStages, PipelineSettings};
use crate::task::MemoryTaskStore;
use crate::tools::{HttpFetcher, PageFetcher, WebSearchTool};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient::default());
    }

    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            base,
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        // Mock 只会回显输入，Extract 阶段因没有抓取来源而失败
        tracing::warn!("No API key set or provider unknown, using Mock LLM; pipelines will not reach Done");
        Arc::new(MockLlmClient::default())
    }
}

/// 按配置装配任务网关
pub async fn create_gateway(cfg: &AppConfig) -> anyhow::Result<TaskGateway> {
    let llm = create_llm_from_config(cfg);
    create_gateway_with_llm(cfg, llm).await
}

/// 使用给定 LLM 装配任务网关（测试与嵌入方使用）
pub async fn create_gateway_with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> anyhow::Result<TaskGateway> {
    let runner = AgentRunner::new(llm, cfg.agent.max_steps);

    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        HttpFetcher::new(cfg.fetch.timeout_secs, &cfg.fetch.user_agent)
            .context("failed to build HTTP client")?,
    );

    let mut stages = AgentStages::new(runner, Arc::clone(&fetcher), cfg.pipeline.instructions.clone())
        .with_limits(cfg.agent.tool_timeout_secs, cfg.fetch.max_chars);
    if let Some(endpoint) = cfg.search.endpoint.as_deref() {
        tracing::info!(endpoint, "web_search enabled for discover");
        stages = stages.with_search(Arc::new(WebSearchTool::new(
            Arc::clone(&fetcher),
            endpoint,
            &cfg.search.query_param,
            cfg.fetch.max_chars,
        )));
    }

    let sink = create_record_sink(cfg.storage.db_path.as_deref()).await;

    Ok(TaskGateway::new(
        Arc::new(MemoryTaskStore::new()),
        sink,
        Arc::new(stages),
        PipelineSettings::from(&cfg.pipeline),
        cfg.pipeline.max_concurrent,
    ))
}
