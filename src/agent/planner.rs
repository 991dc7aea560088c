//! LLM 输出解析
//!
//! 整条回复（可包在一个代码块里）恰好是带非空 "tool" 字段的 JSON 对象时为 ToolCall，否则视为最终答案。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// LLM 返回的 Tool Call（{"tool": "fetch_page", "args": {"url": "..."}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 单步输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 最终答案
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 提取 JSON 块（```json ... ``` 或首个 `{` 到最后一个 `}`）
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 去掉包住整条回复的 ``` 代码块（```json 或裸 ```）
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // 跳过语言标记行
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// 解析 LLM 输出：整条回复是带非空 "tool" 的 JSON 对象时为 ToolCall，其余一律为 Response
pub fn parse_llm_output(output: &str) -> PlannerOutput {
    let trimmed = output.trim();
    let body = strip_code_fence(trimmed);
    let call = (body.starts_with('{') && body.ends_with('}'))
        .then(|| serde_json::from_str::<Value>(body).ok())
        .flatten()
        .and_then(|value| {
            let tool = value.get("tool")?.as_str()?.trim().to_string();
            if tool.is_empty() {
                return None;
            }
            let args = value.get("args").cloned().unwrap_or_else(|| Value::Object(Default::default()));
            Some(ToolCall { tool, args })
        });
    match call {
        Some(call) => PlannerOutput::ToolCall(call),
        None => PlannerOutput::Response(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_call_in_fence() {
        let out = "```json\n{\"tool\": \"fetch_page\", \"args\": {\"url\": \"https://a.example\"}}\n```";
        assert_eq!(
            parse_llm_output(out),
            PlannerOutput::ToolCall(ToolCall {
                tool: "fetch_page".to_string(),
                args: json!({ "url": "https://a.example" }),
            })
        );
    }

    #[test]
    fn test_parse_bare_tool_call() {
        let out = r#" {"tool": "fetch_page"} "#;
        assert_eq!(
            parse_llm_output(out),
            PlannerOutput::ToolCall(ToolCall {
                tool: "fetch_page".to_string(),
                args: json!({}),
            })
        );
    }

    #[test]
    fn test_tool_json_inside_prose_is_response() {
        let out = "Example config:\n```json\n{\"tool\": \"hammer\", \"args\": {}}\n```\nThen hang the frame.";
        assert_eq!(parse_llm_output(out), PlannerOutput::Response(out.to_string()));

        let out = "I'll fetch it: {\"tool\": \"fetch_page\", \"args\": {}}";
        assert_eq!(parse_llm_output(out), PlannerOutput::Response(out.to_string()));
    }

    #[test]
    fn test_parse_plain_text_is_response() {
        assert_eq!(
            parse_llm_output("  Tomatoes like sun. "),
            PlannerOutput::Response("Tomatoes like sun.".to_string())
        );
    }

    #[test]
    fn test_json_without_tool_is_response() {
        let out = r#"{"extracted_text": "abc"}"#;
        assert_eq!(parse_llm_output(out), PlannerOutput::Response(out.to_string()));
    }

    #[test]
    fn test_braces_in_prose_are_not_an_error() {
        let out = "Use a set {a, b} of stakes.";
        assert_eq!(parse_llm_output(out), PlannerOutput::Response(out.to_string()));
    }
}
