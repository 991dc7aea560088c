//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 默认回显最后一条 User 消息；也可传入脚本闭包，按消息内容决定回复（工具调用或最终答案）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

type Script = dyn Fn(&[Message]) -> Result<String, String> + Send + Sync;

/// Mock 客户端
#[derive(Clone)]
pub struct MockLlmClient {
    script: Arc<Script>,
    calls: Arc<AtomicU64>,
}

impl MockLlmClient {
    /// 使用脚本闭包构造：闭包拿到完整消息列表（含 system），返回回复文本
    pub fn new(script: impl Fn(&[Message]) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 已调用 complete 的次数
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(|messages| {
            let last_user = last_user_message(messages).unwrap_or("(no input)");
            Ok(format!("Echo from Mock: {}", last_user))
        })
    }
}

impl std::fmt::Debug for MockLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlmClient").field("calls", &self.calls()).finish()
    }
}

/// 取最后一条 User 消息
pub fn last_user_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
}

/// 取 system 消息（Agent 指令）
pub fn system_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| matches!(m.role, Role::System))
        .map(|m| m.content.as_str())
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.script)(messages)
    }
}
