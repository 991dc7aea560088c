//! 持久化：任务完成后写入一次的结果记录
//!
//! RecordSink 为只追加接口；内存实现用于测试与无数据库运行，SQLite 实现需启用 `async-sqlite` feature。

mod memory;
#[cfg(feature = "async-sqlite")]
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::task::TaskId;

pub use memory::MemoryRecordSink;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteRecordSink;

/// 持久化记录：写入后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub task_id: TaskId,
    pub query: String,
    pub source_reference: String,
    pub content: String,
    /// 写入时间（毫秒时间戳）
    pub created_at: i64,
}

impl PersistedRecord {
    pub fn new(task_id: TaskId, query: String, source_reference: String, content: String) -> Self {
        Self {
            task_id,
            query,
            source_reference,
            content,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 结果存储接口（只追加；同一 task_id 重复写入视为失败）
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn insert(&self, record: &PersistedRecord) -> Result<(), PipelineError>;

    async fn find(&self, task_id: &str) -> Result<Option<PersistedRecord>, PipelineError>;
}

/// 创建结果存储
///
/// 如果提供了 db_path 且启用了 async-sqlite feature，则使用 SQLite；否则使用内存存储
pub async fn create_record_sink(db_path: Option<&Path>) -> Arc<dyn RecordSink> {
    #[cfg(feature = "async-sqlite")]
    if let Some(path) = db_path {
        match SqliteRecordSink::new(path).await {
            Ok(sink) => {
                tracing::info!("Using SQLite record sink: {:?}", path);
                return Arc::new(sink);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite record sink, falling back to memory: {}", e);
            }
        }
    }

    #[cfg(not(feature = "async-sqlite"))]
    if db_path.is_some() {
        tracing::warn!("SQLite record sink requested but async-sqlite feature not enabled, using memory sink");
    }

    tracing::info!("Using in-memory record sink");
    Arc::new(MemoryRecordSink::new())
}
