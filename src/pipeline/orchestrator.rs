//! 流水线编排器：按固定顺序驱动 Discover -> Extract -> Synthesize -> 持久化
//!
//! 编排器是任务状态的唯一写入者。每个阶段先把状态推进到 "进行中"，
//! 带超时与重试地调用阶段执行器，写入阶段结果，再推进到 "已完成"。
//! Synthesize 之后只做一次持久化写入，成功才进入 Done。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineSection;
use crate::core::{AgentError, PipelineError};
use crate::persistence::{PersistedRecord, RecordSink};
use crate::pipeline::stages::StageExecutor;
use crate::task::{Stage, StageOutput, TaskEvent, TaskStatus, TaskStore};

/// 阶段调用策略
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 首次失败后的额外重试次数
    pub stage_retries: u32,
    /// 重试退避基数，第 n 次重试前等待 n * retry_backoff
    pub retry_backoff: Duration,
    /// 单次阶段调用超时
    pub stage_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for PipelineSettings {
    fn from(section: &PipelineSection) -> Self {
        Self {
            stage_retries: section.stage_retries,
            retry_backoff: Duration::from_millis(section.retry_backoff_ms),
            stage_timeout: Duration::from_secs(section.stage_timeout_secs.max(1)),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn RecordSink>,
    stages: Arc<dyn StageExecutor>,
    settings: PipelineSettings,
    events: broadcast::Sender<TaskEvent>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn RecordSink>,
        stages: Arc<dyn StageExecutor>,
        settings: PipelineSettings,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        Self {
            store,
            sink,
            stages,
            settings,
            events,
        }
    }

    /// 运行一个任务直到终态，返回终态
    ///
    /// 任何失败都会以 Error + 详情记录到任务上，不会向调用方抛出。
    pub async fn run(&self, task_id: &str, cancel: CancellationToken) -> TaskStatus {
        tracing::info!(task_id, "pipeline started");
        match self.drive(task_id, &cancel).await {
            Ok(()) => {
                tracing::info!(task_id, "pipeline done");
                TaskStatus::Done
            }
            Err(e) => {
                tracing::warn!(task_id, error = %e, "pipeline failed");
                self.fail(task_id, e.to_string()).await;
                TaskStatus::Error
            }
        }
    }

    /// 把任务标记为 Error 并广播；任务已是终态时只记日志
    pub async fn fail(&self, task_id: &str, detail: String) {
        match self.store.set_error(task_id, detail).await {
            Ok(()) => self.publish(task_id, TaskStatus::Error),
            Err(e) => tracing::warn!(task_id, error = %e, "could not record task failure"),
        }
    }

    async fn drive(&self, task_id: &str, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let query = self.store.get(task_id).await?.query;

        let findings = self
            .call_stage(task_id, Stage::Discover, cancel, || self.stages.discover(&query))
            .await?;
        self.complete_stage(task_id, StageOutput::Discover { findings: findings.clone() })
            .await?;

        let extraction = self
            .call_stage(task_id, Stage::Extract, cancel, || {
                self.stages.extract(&query, &findings)
            })
            .await?;
        self.complete_stage(task_id, StageOutput::Extract(extraction.clone()))
            .await?;

        let content = self
            .call_stage(task_id, Stage::Synthesize, cancel, || {
                self.stages.synthesize(&extraction.extracted_text)
            })
            .await?;
        self.complete_stage(task_id, StageOutput::Synthesize { content: content.clone() })
            .await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let record = PersistedRecord::new(
            task_id.to_string(),
            query,
            extraction.source_reference,
            content,
        );
        self.sink.insert(&record).await.map_err(|e| match e {
            PipelineError::PersistenceFailure(_) => e,
            other => PipelineError::PersistenceFailure(other.to_string()),
        })?;
        tracing::info!(task_id, source = %record.source_reference, "record persisted");

        self.transition(task_id, TaskStatus::Done).await
    }

    /// 推进到阶段的 "进行中" 状态，然后带超时、重试与取消地调用阶段
    async fn call_stage<T, F, Fut>(
        &self,
        task_id: &str,
        stage: Stage,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        self.transition(task_id, stage.running()).await?;

        let attempts = self.settings.stage_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            tracing::info!(task_id, stage = %stage, attempt, "stage started");
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcome = tokio::time::timeout(self.settings.stage_timeout, call()) => outcome,
            };
            match outcome {
                Ok(Ok(value)) => {
                    tracing::info!(task_id, stage = %stage, attempt, "stage finished");
                    return Ok(value);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.settings.stage_timeout)
                }
            }

            if attempt < attempts {
                tracing::warn!(task_id, stage = %stage, attempt, error = %last_error, "stage attempt failed, retrying");
                let backoff = self.settings.retry_backoff * attempt;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(PipelineError::StageFailure {
            stage,
            detail: last_error,
        })
    }

    /// 写入阶段结果；有 "-ed" 状态的阶段随即推进
    async fn complete_stage(&self, task_id: &str, output: StageOutput) -> Result<(), PipelineError> {
        let stage = output.stage();
        self.store.set_stage_result(task_id, output).await?;
        match stage.completed() {
            Some(status) => self.transition(task_id, status).await,
            None => Ok(()),
        }
    }

    async fn transition(&self, task_id: &str, status: TaskStatus) -> Result<(), PipelineError> {
        self.store.update_status(task_id, status).await?;
        tracing::debug!(task_id, status = %status, "status changed");
        self.publish(task_id, status);
        Ok(())
    }

    fn publish(&self, task_id: &str, status: TaskStatus) {
        // 没有订阅者时 send 返回 Err，忽略即可
        let _ = self.events.send(TaskEvent {
            task_id: task_id.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::persistence::MemoryRecordSink;
    use crate::task::{Extraction, MemoryTaskStore};

    /// 记录调用顺序与输入的阶段桩
    #[derive(Default)]
    struct StubStages {
        calls: Mutex<Vec<String>>,
        discover_failures: AtomicU32,
        fail_extract: bool,
        slow_synthesize: bool,
    }

    impl StubStages {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StageExecutor for StubStages {
        async fn discover(&self, query: &str) -> Result<String, AgentError> {
            self.calls.lock().unwrap().push(format!("discover:{query}"));
            if self.discover_failures.load(Ordering::SeqCst) > 0 {
                self.discover_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AgentError::LlmError("rate limited".to_string()));
            }
            Ok(format!("see https://example.com/{}", query.replace(' ', "-")))
        }

        async fn extract(&self, _query: &str, findings: &str) -> Result<Extraction, AgentError> {
            self.calls.lock().unwrap().push(format!("extract:{findings}"));
            if self.fail_extract {
                return Err(AgentError::FetchFailed("HTTP 500 Internal Server Error".to_string()));
            }
            let url = findings.trim_start_matches("see ").to_string();
            Ok(Extraction {
                source_reference: url.clone(),
                extracted_text: format!("text from {url}"),
            })
        }

        async fn synthesize(&self, extracted_text: &str) -> Result<String, AgentError> {
            self.calls.lock().unwrap().push(format!("synthesize:{extracted_text}"));
            if self.slow_synthesize {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(format!("Tutorial based on {extracted_text}"))
        }
    }

    struct Harness {
        store: Arc<MemoryTaskStore>,
        sink: Arc<MemoryRecordSink>,
        stages: Arc<StubStages>,
        orchestrator: Orchestrator,
        events: broadcast::Receiver<TaskEvent>,
    }

    fn harness(stages: StubStages, settings: PipelineSettings) -> Harness {
        let store = Arc::new(MemoryTaskStore::new());
        let sink = Arc::new(MemoryRecordSink::new());
        let stages = Arc::new(stages);
        let (tx, events) = broadcast::channel(64);
        let orchestrator = Orchestrator::new(store.clone(), sink.clone(), stages.clone(), settings, tx);
        Harness {
            store,
            sink,
            stages,
            orchestrator,
            events,
        }
    }

    fn fast_settings(stage_retries: u32) -> PipelineSettings {
        PipelineSettings {
            stage_retries,
            retry_backoff: Duration::from_millis(1),
            stage_timeout: Duration::from_secs(5),
        }
    }

    fn drain(events: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskStatus> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            out.push(ev.status);
        }
        out
    }

    #[tokio::test]
    async fn test_run_walks_every_status_in_order() {
        let mut h = harness(StubStages::default(), fast_settings(0));
        let id = h.store.insert("growing tomatoes").await;

        let status = h.orchestrator.run(&id, CancellationToken::new()).await;
        assert_eq!(status, TaskStatus::Done);

        assert_eq!(
            drain(&mut h.events),
            vec![
                TaskStatus::Discovering,
                TaskStatus::Discovered,
                TaskStatus::Extracting,
                TaskStatus::Extracted,
                TaskStatus::Synthesizing,
                TaskStatus::Done,
            ]
        );

        let record = h.sink.find(&id).await.unwrap().unwrap();
        assert_eq!(record.query, "growing tomatoes");
        assert_eq!(record.source_reference, "https://example.com/growing-tomatoes");
        assert_eq!(record.content, "Tutorial based on text from https://example.com/growing-tomatoes");

        let task = h.store.get(&id).await.unwrap();
        assert_eq!(task.source_reference.as_deref(), Some("https://example.com/growing-tomatoes"));
        assert_eq!(task.content(), Some(record.content.as_str()));
    }

    #[tokio::test]
    async fn test_stage_inputs_are_previous_outputs() {
        let h = harness(StubStages::default(), fast_settings(0));
        let id = h.store.insert("q").await;
        h.orchestrator.run(&id, CancellationToken::new()).await;

        assert_eq!(
            h.stages.calls(),
            vec![
                "discover:q".to_string(),
                "extract:see https://example.com/q".to_string(),
                "synthesize:text from https://example.com/q".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_failure_stops_pipeline() {
        let stages = StubStages {
            fail_extract: true,
            ..Default::default()
        };
        let h = harness(stages, fast_settings(0));
        let id = h.store.insert("q").await;

        let status = h.orchestrator.run(&id, CancellationToken::new()).await;
        assert_eq!(status, TaskStatus::Error);

        let task = h.store.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        let detail = task.error_detail.clone().unwrap();
        assert!(detail.contains("extract"), "{detail}");
        assert!(detail.contains("HTTP 500"), "{detail}");
        assert!(task.findings().is_some());
        assert!(task.extraction().is_none());
        assert!(!h.stages.calls().iter().any(|c| c.starts_with("synthesize")));
        assert!(h.sink.find(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let stages = StubStages {
            discover_failures: AtomicU32::new(1),
            ..Default::default()
        };
        let h = harness(stages, fast_settings(1));
        let id = h.store.insert("q").await;

        assert_eq!(h.orchestrator.run(&id, CancellationToken::new()).await, TaskStatus::Done);
        let discovers = h.stages.calls().iter().filter(|c| c.starts_with("discover")).count();
        assert_eq!(discovers, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let stages = StubStages {
            discover_failures: AtomicU32::new(5),
            ..Default::default()
        };
        let h = harness(stages, fast_settings(2));
        let id = h.store.insert("q").await;

        assert_eq!(h.orchestrator.run(&id, CancellationToken::new()).await, TaskStatus::Error);
        let task = h.store.get(&id).await.unwrap();
        assert!(task.error_detail.unwrap().contains("rate limited"));
        assert_eq!(h.stages.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_stage_timeout_is_failure() {
        let stages = StubStages {
            slow_synthesize: true,
            ..Default::default()
        };
        let settings = PipelineSettings {
            stage_timeout: Duration::from_millis(50),
            ..fast_settings(0)
        };
        let h = harness(stages, settings);
        let id = h.store.insert("q").await;

        assert_eq!(h.orchestrator.run(&id, CancellationToken::new()).await, TaskStatus::Error);
        let task = h.store.get(&id).await.unwrap();
        assert_eq!(task.error_detail.as_deref(), Some("Stage synthesize failed: timed out after 50ms"));
        assert!(task.content().is_none());
    }

    #[tokio::test]
    async fn test_cancel_marks_error() {
        let stages = StubStages {
            slow_synthesize: true,
            ..Default::default()
        };
        let h = harness(stages, fast_settings(0));
        let id = h.store.insert("q").await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        assert_eq!(h.orchestrator.run(&id, cancel).await, TaskStatus::Error);
        let task = h.store.get(&id).await.unwrap();
        assert_eq!(task.error_detail.as_deref(), Some("Pipeline cancelled"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_done() {
        let h = harness(StubStages::default(), fast_settings(0));
        let id = h.store.insert("q").await;
        // 预先占用同一 task_id，制造写入冲突
        h.sink
            .insert(&PersistedRecord::new(id.clone(), "q".into(), "x".into(), "y".into()))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.run(&id, CancellationToken::new()).await, TaskStatus::Error);
        let task = h.store.get(&id).await.unwrap();
        assert!(task.error_detail.as_deref().unwrap().starts_with("Persistence failure"));
        // Synthesize 结果已写入，但任务不是 Done
        assert!(task.content().is_some());
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let h = harness(StubStages::default(), fast_settings(0));
        assert_eq!(
            h.orchestrator.run("task_missing", CancellationToken::new()).await,
            TaskStatus::Error
        );
        assert!(h.stages.calls().is_empty());
    }
}
