//! 任务网关：创建任务、后台启动流水线、回答状态 / 结果查询
//!
//! create_task 只做校验与入库，流水线在独立的 tokio 任务中运行；
//! 外层监管任务等待其 JoinHandle，把 panic 转成任务的 Error 状态。

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::PipelineError;
use crate::persistence::{PersistedRecord, RecordSink};
use crate::pipeline::{Orchestrator, PipelineSettings, StageExecutor};
use crate::task::{Task, TaskEvent, TaskId, TaskStatus, TaskStore};

/// 事件广播缓冲容量；落后的订阅者会收到 Lagged 并回退到读存储
const EVENT_CAPACITY: usize = 256;

/// create_task 的返回值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

pub struct TaskGateway {
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn RecordSink>,
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
}

impl TaskGateway {
    pub fn new(
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn RecordSink>,
        stages: Arc<dyn StageExecutor>,
        settings: PipelineSettings,
        max_concurrent: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            stages,
            settings,
            events.clone(),
        ));
        Self {
            store,
            sink,
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// 创建任务并在后台启动流水线，立即返回
    pub async fn create_task(&self, query: &str) -> Result<CreatedTask, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::Validation("query must not be empty".to_string()));
        }

        let task_id = self.store.insert(query).await;
        tracing::info!(task_id = %task_id, "task created");
        let _ = self.events.send(TaskEvent {
            task_id: task_id.clone(),
            status: TaskStatus::Created,
        });

        self.launch(task_id.clone());
        Ok(CreatedTask {
            task_id,
            status: TaskStatus::Created,
        })
    }

    pub async fn get_status(&self, task_id: &str) -> Result<TaskStatus, PipelineError> {
        Ok(self.store.get(task_id).await?.status)
    }

    /// 任务快照（含阶段结果与错误详情）
    pub async fn get_task(&self, task_id: &str) -> Result<Task, PipelineError> {
        self.store.get(task_id).await
    }

    /// 读取已持久化的结果；任务未 Done 时返回 NotReady
    pub async fn get_result(&self, task_id: &str) -> Result<PersistedRecord, PipelineError> {
        let task = self.store.get(task_id).await?;
        if task.status != TaskStatus::Done {
            return Err(PipelineError::NotReady {
                task_id: task.id,
                status: task.status,
            });
        }
        self.find_record(task_id).await?.ok_or_else(|| {
            PipelineError::PersistenceFailure(format!("record missing for task {}", task_id))
        })
    }

    /// 直接读取持久化记录；不检查任务状态
    pub async fn find_record(&self, task_id: &str) -> Result<Option<PersistedRecord>, PipelineError> {
        self.sink.find(task_id).await
    }

    /// 订阅所有任务的状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// 等待任务进入终态
    pub async fn wait_for_terminal(&self, task_id: &str) -> Result<TaskStatus, PipelineError> {
        // 先订阅再读存储，避免错过两者之间发生的终态事件
        let mut rx = self.events.subscribe();
        loop {
            let status = self.get_status(task_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            loop {
                match rx.recv().await {
                    Ok(event) if event.task_id == task_id && event.status.is_terminal() => {
                        return Ok(event.status);
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(task_id, skipped, "event receiver lagged");
                        break;
                    }
                    Err(RecvError::Closed) => return Err(PipelineError::Cancelled),
                }
            }
        }
    }

    /// 取消所有进行中与排队中的流水线
    pub fn shutdown(&self) {
        tracing::info!("gateway shutting down");
        self.shutdown.cancel();
    }

    fn launch(&self, task_id: TaskId) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = Arc::clone(&self.permits);
        let cancel = self.shutdown.child_token();
        let run_id = task_id.clone();

        let handle = tokio::spawn(async move {
            // 拿到许可前任务保持 Created
            let _permit = tokio::select! {
                _ = cancel.cancelled() => {
                    orchestrator.fail(&run_id, PipelineError::Cancelled.to_string()).await;
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        orchestrator.fail(&run_id, "pipeline executor closed".to_string()).await;
                        return;
                    }
                },
            };
            orchestrator.run(&run_id, cancel).await;
        });

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                let detail = if e.is_panic() {
                    format!("pipeline panicked: {}", panic_message(e.into_panic()))
                } else {
                    "pipeline aborted".to_string()
                };
                tracing::error!(task_id = %task_id, "{}", detail);
                orchestrator.fail(&task_id, detail).await;
            }
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
