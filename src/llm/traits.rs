//! LLM 客户端抽象
//!
//! 一次调用 = system 指令 + 用户输入 + 可选的工具声明；返回按顺序排列的文本片段与工具调用。
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::generate。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 模型调用失败：网络、超时、响应格式错误统一为一种错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// 提供给模型的工具声明（name / description / JSON Schema 参数）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单次生成请求
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// 模型 ID（由 ModelRouter 选出）
    pub model: String,
    /// 系统指令：模板 + 记忆 + 历史，跨调用保持为稳定前缀
    pub system: String,
    /// 用户输入：历史窗口中最新的一行
    pub input: String,
    pub tools: Vec<ToolSpec>,
}

/// 模型返回的一次工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// 响应片段：文本或工具调用，保持返回顺序
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Text(String),
    ToolCall(ToolInvocation),
}

/// 模型响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub parts: Vec<ResponsePart>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            parts: vec![ResponsePart::Text(content.into())],
        }
    }

    pub fn push_text(mut self, content: impl Into<String>) -> Self {
        self.parts.push(ResponsePart::Text(content.into()));
        self
    }

    pub fn push_tool_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.parts.push(ResponsePart::ToolCall(ToolInvocation {
            name: name.into(),
            arguments,
        }));
        self
    }

    /// 所有文本片段按返回顺序拼接
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ResponsePart::Text(t) => Some(t.as_str()),
                ResponsePart::ToolCall(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// 所有工具调用，按返回顺序
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|p| match p {
            ResponsePart::ToolCall(call) => Some(call),
            ResponsePart::Text(_) => None,
        })
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_text_keeps_order_and_skips_tool_calls() {
        let resp = ModelResponse::text("Hello")
            .push_tool_call("add", serde_json::json!({"content": "x"}))
            .push_text(", world");
        assert_eq!(resp.joined_text(), "Hello, world");
        assert_eq!(resp.tool_calls().count(), 1);
    }
}
