//! 研究流水线：阶段执行器与编排器

pub mod orchestrator;
pub mod stages;

pub use orchestrator::{Orchestrator, PipelineSettings};
pub use stages::{AgentStages, StageExecutor};
