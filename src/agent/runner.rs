//! Agent 运行器：Provider 调用契约
//!
//! (instructions, input, 可选输出 schema, 可选工具) -> 文本或符合 schema 的值。
//! Plan -> Act (Tool) -> Observe 循环，直到 LLM 给出最终答案或超过最大步数；
//! 工具失败作为 Observation 回传给 LLM，由它决定换一个来源或结束。

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

use crate::agent::planner::{extract_json_block, parse_llm_output, PlannerOutput};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::tools::{tool_call_schema_json, ToolExecutor};

/// Observation 日志预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 一个 Agent 的静态定义：名称与指令
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub instructions: String,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
        }
    }
}

/// Agent 运行器：持有 LLM 与最大步数，可被多个阶段共享
#[derive(Clone)]
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    max_steps: usize,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmClient>, max_steps: usize) -> Self {
        Self {
            llm,
            max_steps: max_steps.max(1),
        }
    }

    /// 运行 Agent，返回最终文本答案
    pub async fn run(
        &self,
        agent: &AgentSpec,
        input: &str,
        tools: Option<&ToolExecutor>,
    ) -> Result<String, AgentError> {
        let system = build_system_prompt(agent, tools, None);
        self.run_loop(agent, system, input, tools, |text| Ok(text.to_string()))
            .await
    }

    /// 运行 Agent，要求最终答案符合 T 的 JSON Schema；不符合时提示 LLM 重答（计入步数）
    pub async fn run_structured<T>(
        &self,
        agent: &AgentSpec,
        input: &str,
        tools: Option<&ToolExecutor>,
    ) -> Result<T, AgentError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_string_pretty(&schema_for!(T))
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        let system = build_system_prompt(agent, tools, Some(&schema));
        self.run_loop(agent, system, input, tools, |text| {
            let json = extract_json_block(text).ok_or_else(|| "no JSON object found".to_string())?;
            serde_json::from_str::<T>(json).map_err(|e| e.to_string())
        })
        .await
    }

    async fn run_loop<T>(
        &self,
        agent: &AgentSpec,
        system: String,
        input: &str,
        tools: Option<&ToolExecutor>,
        finish: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, AgentError> {
        let mut messages = vec![Message::system(system), Message::user(input.to_string())];

        for step in 1..=self.max_steps {
            let reply = self
                .llm
                .complete(&messages)
                .await
                .map_err(AgentError::LlmError)?;
            tracing::debug!(agent = %agent.name, step, reply_chars = reply.len(), "llm reply");

            // 没有工具时，回复一律视为最终答案
            let call = tools.and_then(|executor| match parse_llm_output(&reply) {
                PlannerOutput::ToolCall(call) => Some((executor, call)),
                PlannerOutput::Response(_) => None,
            });

            match call {
                Some((executor, call)) => {
                    let observation = match executor.execute(&call.tool, call.args.clone()).await {
                        Ok(output) => output,
                        Err(e) => {
                            tracing::warn!(agent = %agent.name, tool = %call.tool, error = %e, "tool call failed");
                            format!("Error: {}", e)
                        }
                    };
                    tracing::debug!(
                        agent = %agent.name,
                        tool = %call.tool,
                        preview = %preview(&observation),
                        "observation"
                    );
                    messages.push(Message::assistant(reply));
                    messages.push(Message::user(format!(
                        "Observation ({}):\n{}",
                        call.tool, observation
                    )));
                }
                None => match finish(reply.trim()) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        tracing::warn!(agent = %agent.name, step, error = %e, "final answer rejected");
                        messages.push(Message::assistant(reply));
                        messages.push(Message::user(format!(
                            "Your answer does not match the required output format ({}). Reply again with only the JSON object.",
                            e
                        )));
                    }
                },
            }
        }

        Err(AgentError::MaxStepsExceeded {
            agent: agent.name.clone(),
            max_steps: self.max_steps,
        })
    }
}

fn build_system_prompt(agent: &AgentSpec, tools: Option<&ToolExecutor>, output_schema: Option<&str>) -> String {
    let mut system = agent.instructions.trim().to_string();

    if let Some(executor) = tools.filter(|e| !e.registry().is_empty()) {
        system.push_str("\n\n## Tools\nYou can call these tools:\n");
        system.push_str(&executor.registry().to_schema_json());
        system.push_str("\n\nTo call a tool, reply with only a JSON object matching this schema:\n");
        system.push_str(&tool_call_schema_json());
        system.push_str(
            "\n\nThe tool result comes back as an \"Observation\" message. \
             When you are done, reply with your final answer instead of a tool call.",
        );
    }

    if let Some(schema) = output_schema {
        system.push_str(
            "\n\n## Output format\nYour final answer must be a single JSON object matching this JSON Schema, and nothing else:\n",
        );
        system.push_str(schema);
    }

    system
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{last_user_message, system_message};
    use crate::llm::MockLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::Value;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    fn upper_executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(UpperTool);
        ToolExecutor::new(registry, 5)
    }

    #[tokio::test]
    async fn test_plain_answer_without_tools() {
        let llm = Arc::new(MockLlmClient::new(|messages| {
            assert!(!system_message(messages).unwrap().contains("## Tools"));
            Ok(format!("answer to {}", last_user_message(messages).unwrap()))
        }));
        let runner = AgentRunner::new(llm, 3);
        let out = runner
            .run(&AgentSpec::new("plain", "Be brief."), "hi", None)
            .await
            .unwrap();
        assert_eq!(out, "answer to hi");
    }

    #[tokio::test]
    async fn test_tool_observation_is_fed_back() {
        let llm = Arc::new(MockLlmClient::new(|messages| {
            let last = last_user_message(messages).unwrap();
            if let Some(obs) = last.strip_prefix("Observation (upper):\n") {
                Ok(format!("final: {obs}"))
            } else {
                Ok(r#"{"tool": "upper", "args": {"text": "tomato"}}"#.to_string())
            }
        }));
        let runner = AgentRunner::new(llm.clone(), 4);
        let executor = upper_executor();
        let out = runner
            .run(&AgentSpec::new("tooling", "Use tools."), "go", Some(&executor))
            .await
            .unwrap();
        assert_eq!(out, "final: TOMATO");
        assert_eq!(llm.calls(), 2);
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Answer {
        value: u32,
    }

    #[tokio::test]
    async fn test_structured_answer_retries_on_bad_json() {
        let llm = Arc::new(MockLlmClient::new(|messages| {
            assert!(system_message(messages).unwrap().contains("## Output format"));
            if messages.len() == 2 {
                Ok("not json at all".to_string())
            } else {
                Ok("```json\n{\"value\": 7}\n```".to_string())
            }
        }));
        let runner = AgentRunner::new(llm, 3);
        let answer: Answer = runner
            .run_structured(&AgentSpec::new("structured", "Count."), "x", None)
            .await
            .unwrap();
        assert_eq!(answer.value, 7);
    }

    #[tokio::test]
    async fn test_max_steps_exceeded() {
        let llm = Arc::new(MockLlmClient::new(|_| {
            Ok(r#"{"tool": "upper", "args": {"text": "again"}}"#.to_string())
        }));
        let runner = AgentRunner::new(llm, 2);
        let executor = upper_executor();
        let err = runner
            .run(&AgentSpec::new("looping", "Loop."), "x", Some(&executor))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MaxStepsExceeded { max_steps: 2, .. }));
    }

    const HAMMER_TUTORIAL: &str = "# Hanging a picture\n\n1. Pick a nail.\n2. Configure your assistant like this:\n\n```json\n{\"tool\": \"hammer\", \"args\": {}}\n```\n\n3. Hang the frame.";

    #[tokio::test]
    async fn test_tool_json_in_answer_without_tools_is_final() {
        let llm = Arc::new(MockLlmClient::new(|_| Ok(HAMMER_TUTORIAL.to_string())));
        let runner = AgentRunner::new(llm.clone(), 3);
        let out = runner
            .run(&AgentSpec::new("writer", "Write a tutorial."), "text", None)
            .await
            .unwrap();
        assert_eq!(out, HAMMER_TUTORIAL);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_json_embedded_in_prose_is_final_with_tools() {
        let llm = Arc::new(MockLlmClient::new(|_| Ok(HAMMER_TUTORIAL.to_string())));
        let runner = AgentRunner::new(llm.clone(), 3);
        let executor = upper_executor();
        let out = runner
            .run(&AgentSpec::new("writer", "Write a tutorial."), "text", Some(&executor))
            .await
            .unwrap();
        assert_eq!(out, HAMMER_TUTORIAL);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let llm = Arc::new(MockLlmClient::new(|_| Err("rate limited".to_string())));
        let runner = AgentRunner::new(llm, 2);
        let err = runner
            .run(&AgentSpec::new("failing", "x"), "x", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "LLM error: rate limited");
    }
}
