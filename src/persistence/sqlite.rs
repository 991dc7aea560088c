//! 异步 SQLite 结果存储（sqlx）

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{PersistedRecord, RecordSink};
use crate::core::PipelineError;

pub struct SqliteRecordSink {
    pool: SqlitePool,
}

impl SqliteRecordSink {
    /// 打开（必要时创建）数据库文件并建表；父目录不存在时自动创建
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let sink = Self { pool };
        sink.init_tables().await?;
        Ok(sink)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_results (
                task_id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                source_reference TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn persistence_error(e: sqlx::Error) -> PipelineError {
    PipelineError::PersistenceFailure(e.to_string())
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn insert(&self, record: &PersistedRecord) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO task_results (task_id, query, source_reference, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.task_id)
        .bind(&record.query)
        .bind(&record.source_reference)
        .bind(&record.content)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    async fn find(&self, task_id: &str) -> Result<Option<PersistedRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT task_id, query, source_reference, content, created_at
             FROM task_results WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence_error)?;

        Ok(row.map(|row| PersistedRecord {
            task_id: row.get("task_id"),
            query: row.get("query"),
            source_reference: row.get("source_reference"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }))
    }
}
