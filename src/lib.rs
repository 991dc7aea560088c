//! Scribe - 异步多阶段研究流水线
//!
//! 接收查询，依次运行 Discover（检索）→ Extract（抓取来源正文）→ Synthesize（生成教程），
//! 用状态机跟踪进度，完成后把结果写入持久化存储一次。
//!
//! 模块划分：
//! - **agent**: Agent 运行器（工具调用循环、结构化输出）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **gateway**: 任务网关（创建、后台启动、状态 / 结果查询）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **persistence**: 结果记录存储（内存 / SQLite）
//! - **pipeline**: 阶段执行器与编排器
//! - **task**: 任务模型、状态机与任务存储
//! - **tools**: 工具注册表、执行器、页面抓取与搜索
//! - **web**: HTTP 接口（feature = "web"）

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod runtime;
pub mod task;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;

pub use gateway::{CreatedTask, TaskGateway};
pub use task::{Task, TaskStatus};
