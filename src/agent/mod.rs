//! Agent 层：LLM 输出解析与工具调用循环

pub mod planner;
pub mod runner;

pub use planner::{parse_llm_output, PlannerOutput, ToolCall};
pub use runner::{AgentRunner, AgentSpec};
