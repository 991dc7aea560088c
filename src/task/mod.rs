//! 任务层：Task 实体、状态机与任务存储

pub mod store;
pub mod types;

pub use store::{MemoryTaskStore, TaskStore};
pub use types::{Extraction, Stage, StageOutput, Task, TaskEvent, TaskId, TaskStatus};
