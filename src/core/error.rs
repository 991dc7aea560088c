//! 错误类型
//!
//! PipelineError：网关 / 存储 / 编排层的错误分类（校验、未找到、未就绪、阶段失败、持久化失败）。
//! AgentError：Provider 调用与工具执行过程中的错误，由编排器转为 StageFailure。

use thiserror::Error;

use crate::task::{Stage, TaskId, TaskStatus};

/// 流水线错误分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// 请求不合法（如空 query），任务不会被创建
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// 任务存在但尚未 Done
    #[error("Task {task_id} is not ready (status: {status})")]
    NotReady { task_id: TaskId, status: TaskStatus },

    #[error("Stage {stage} failed: {detail}")]
    StageFailure { stage: Stage, detail: String },

    /// Synthesize 成功后的持久化写入失败
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Stage result already recorded for task {task_id}: {stage}")]
    StageAlreadyRecorded { task_id: TaskId, stage: Stage },

    #[error("Pipeline cancelled")]
    Cancelled,
}

/// Agent 运行过程中可能出现的错误（LLM、解析、工具、抓取等）
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Agent {agent} exceeded {max_steps} steps without a final answer")]
    MaxStepsExceeded { agent: String, max_steps: usize },

    /// 抓取失败（非 2xx、网络错误），且本次运行没有任何成功抓取
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("No source page was fetched")]
    NoSource,
}
