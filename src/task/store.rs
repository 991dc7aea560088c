//! 任务存储抽象层
//!
//! 定义统一的任务状态接口；内存实现用单把 RwLock 保护整张表，
//! 保证同一任务的 status 与 stage_results 不会被读到中间态。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::PipelineError;
use crate::task::{Stage, StageOutput, Task, TaskId, TaskStatus};

/// 任务存储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 以 Created 状态插入新任务，返回新 ID
    async fn insert(&self, query: &str) -> TaskId;

    /// 获取任务快照；未知 ID 返回 NotFound
    async fn get(&self, task_id: &str) -> Result<Task, PipelineError>;

    /// 推进状态；只接受状态机允许的转换
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), PipelineError>;

    /// 写入阶段结果；任务必须处于该阶段的执行中状态，且每个阶段只写一次。
    /// Extract 结果同时写入 source_reference。
    async fn set_stage_result(&self, task_id: &str, output: StageOutput) -> Result<(), PipelineError>;

    /// 标记失败：status = Error 并记录 error_detail
    async fn set_error(&self, task_id: &str, detail: String) -> Result<(), PipelineError>;
}

/// 内存任务存储
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// 清理已结束的旧任务，返回清理数量（由部署方按需调用）
    pub async fn prune_finished(&self, max_age_hours: u64) -> usize {
        let cutoff = chrono::Utc::now().timestamp_millis() - (max_age_hours as i64 * 3600 * 1000);
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| !(t.status.is_terminal() && t.updated_at < cutoff));
        before - tasks.len()
    }
}

fn touch(task: &mut Task) {
    task.updated_at = chrono::Utc::now().timestamp_millis();
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, query: &str) -> TaskId {
        let task = Task::new(query.to_string());
        let task_id = task.id.clone();
        self.tasks.write().await.insert(task_id.clone(), task);
        task_id
    }

    async fn get(&self, task_id: &str) -> Result<Task, PipelineError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(task_id.to_string()))
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), PipelineError> {
        if status == TaskStatus::Error {
            return Err(PipelineError::Validation(
                "use set_error to move a task into Error".to_string(),
            ));
        }
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| PipelineError::NotFound(task_id.to_string()))?;
        if !task.status.can_transition_to(status) {
            return Err(PipelineError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        touch(task);
        Ok(())
    }

    async fn set_stage_result(&self, task_id: &str, output: StageOutput) -> Result<(), PipelineError> {
        let stage: Stage = output.stage();
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| PipelineError::NotFound(task_id.to_string()))?;
        if task.stage_results.contains_key(&stage) {
            return Err(PipelineError::StageAlreadyRecorded {
                task_id: task_id.to_string(),
                stage,
            });
        }
        if task.status != stage.running() {
            return Err(PipelineError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: stage.running(),
            });
        }
        if let StageOutput::Extract(extraction) = &output {
            task.source_reference = Some(extraction.source_reference.clone());
        }
        task.stage_results.insert(stage, output);
        touch(task);
        Ok(())
    }

    async fn set_error(&self, task_id: &str, detail: String) -> Result<(), PipelineError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| PipelineError::NotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Error,
            });
        }
        task.status = TaskStatus::Error;
        task.error_detail = Some(detail);
        touch(task);
        Ok(())
    }
}
