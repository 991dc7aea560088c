//! 任务网关：流水线对外的唯一入口（CLI 与 HTTP 共用）

mod task_gateway;

pub use task_gateway::{CreatedTask, TaskGateway};
