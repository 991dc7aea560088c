//! 任务实体与状态机
//!
//! 状态全序：Created → Discovering → Discovered → Extracting → Extracted → Synthesizing → Done；
//! Error 为终态，可从任意非终态进入。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 任务 ID（`task_<uuid>`）
pub type TaskId = String;

/// 生成新的任务 ID
pub fn new_task_id() -> TaskId {
    format!("task_{}", uuid::Uuid::new_v4())
}

/// 任务状态（封闭枚举，不允许自由文本）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Discovering,
    Discovered,
    Extracting,
    Extracted,
    Synthesizing,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Discovering => "discovering",
            Self::Discovered => "discovered",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// 全序中的下一个状态；终态没有后继
    pub fn successor(&self) -> Option<TaskStatus> {
        match self {
            Self::Created => Some(Self::Discovering),
            Self::Discovering => Some(Self::Discovered),
            Self::Discovered => Some(Self::Extracting),
            Self::Extracting => Some(Self::Extracted),
            Self::Extracted => Some(Self::Synthesizing),
            Self::Synthesizing => Some(Self::Done),
            Self::Done | Self::Error => None,
        }
    }

    /// 只允许前进一步，或从非终态进入 Error
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == TaskStatus::Error || self.successor() == Some(next)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流水线阶段；Ord 与执行顺序一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discover,
    Extract,
    Synthesize,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Discover, Stage::Extract, Stage::Synthesize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Extract => "extract",
            Self::Synthesize => "synthesize",
        }
    }

    /// 阶段执行中的状态
    pub fn running(&self) -> TaskStatus {
        match self {
            Self::Discover => TaskStatus::Discovering,
            Self::Extract => TaskStatus::Extracting,
            Self::Synthesize => TaskStatus::Synthesizing,
        }
    }

    /// 阶段完成后的状态；Synthesize 之后须先持久化才能到 Done，故无独立完成态
    pub fn completed(&self) -> Option<TaskStatus> {
        match self {
            Self::Discover => Some(TaskStatus::Discovered),
            Self::Extract => Some(TaskStatus::Extracted),
            Self::Synthesize => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract 阶段产物：选中的来源与抽取文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub source_reference: String,
    pub extracted_text: String,
}

/// 单个阶段的输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    Discover { findings: String },
    Extract(Extraction),
    Synthesize { content: String },
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Discover { .. } => Stage::Discover,
            Self::Extract(_) => Stage::Extract,
            Self::Synthesize { .. } => Stage::Synthesize,
        }
    }
}

/// 任务：一次查询的完整流水线运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub query: String,
    pub status: TaskStatus,
    /// 按阶段顺序排列，每个阶段至多写入一次
    pub stage_results: BTreeMap<Stage, StageOutput>,
    pub source_reference: Option<String>,
    /// 仅在 status == Error 时存在
    pub error_detail: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(query: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_task_id(),
            query,
            status: TaskStatus::Created,
            stage_results: BTreeMap::new(),
            source_reference: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn findings(&self) -> Option<&str> {
        match self.stage_results.get(&Stage::Discover) {
            Some(StageOutput::Discover { findings }) => Some(findings),
            _ => None,
        }
    }

    pub fn extraction(&self) -> Option<&Extraction> {
        match self.stage_results.get(&Stage::Extract) {
            Some(StageOutput::Extract(extraction)) => Some(extraction),
            _ => None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self.stage_results.get(&Stage::Synthesize) {
            Some(StageOutput::Synthesize { content }) => Some(content),
            _ => None,
        }
    }
}

/// 状态变更事件（广播给订阅者）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
}
