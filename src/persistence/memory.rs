use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PersistedRecord, RecordSink};
use crate::core::PipelineError;
use crate::task::TaskId;

/// 内存结果存储
#[derive(Default)]
pub struct MemoryRecordSink {
    records: RwLock<HashMap<TaskId, PersistedRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn insert(&self, record: &PersistedRecord) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.task_id) {
            return Err(PipelineError::PersistenceFailure(format!(
                "record for {} already exists",
                record.task_id
            )));
        }
        records.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, task_id: &str) -> Result<Option<PersistedRecord>, PipelineError> {
        Ok(self.records.read().await.get(task_id).cloned())
    }
}
