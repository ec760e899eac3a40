//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用 `/chat/completions`：system + user 两条消息，
//! 有工具声明时附带 function tools，响应中的文本与 `tool_calls` 按顺序转换为 ResponsePart。
//! base_url 可配置（OpenAI、自建代理等）。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionTools, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{
    LlmClient, LlmError, ModelRequest, ModelResponse, ResponsePart, ToolInvocation, ToolSpec,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: &str, timeout_secs: u64) -> Self {
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let config = OpenAIConfig::new()
            .with_api_base(base_url.clone())
            .with_api_key(api_key.to_string());

        Self {
            client: Client::with_config(config),
            base_url,
            timeout_secs,
        }
    }

    fn to_openai_messages(
        &self,
        request: &ModelRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.clone())
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.input.clone())
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model)
            .messages(self.to_openai_messages(request)?);
        if !request.tools.is_empty() {
            args.tools(to_openai_tools(&request.tools));
        }
        let req = args.build().map_err(|e| LlmError::Request(e.to_string()))?;

        tracing::debug!(
            model = %request.model,
            base_url = %self.base_url,
            tools = request.tools.len(),
            "Calling LLM API"
        );
        let response = self
            .client
            .chat()
            .create(req)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "LLM token usage"
            );
        }

        parse_chat_completion(response)
    }
}

/// ToolSpec → OpenAI function tool
fn to_openai_tools(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
    tools
        .iter()
        .map(|t| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                    strict: None,
                },
            })
        })
        .collect()
}

/// 首个 choice 的文本与函数工具调用；自定义工具调用被忽略
fn parse_chat_completion(response: CreateChatCompletionResponse) -> Result<ModelResponse, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::MalformedResponse("no choices in response".to_string()))?;

    let mut parts = Vec::new();
    if let Some(content) = message.content {
        parts.push(ResponsePart::Text(content));
    }
    for call in message.tool_calls.unwrap_or_default() {
        match call {
            ChatCompletionMessageToolCalls::Function(call) => {
                // arguments 是 JSON 字符串；解析失败时保留原文，交给协议层报告
                let raw = call.function.arguments;
                let arguments = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                parts.push(ResponsePart::ToolCall(ToolInvocation {
                    name: call.function.name,
                    arguments,
                }));
            }
            ChatCompletionMessageToolCalls::Custom(call) => {
                tracing::warn!(id = %call.id, "Ignoring custom tool call");
            }
        }
    }
    Ok(ModelResponse { parts })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), self.complete(request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(message: Value) -> CreateChatCompletionResponse {
        serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4.1-mini",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop"}],
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_text_and_tool_calls() {
        let response = completion(json!({
            "role": "assistant",
            "content": "了解！",
            "tool_calls": [
                {"id": "1", "type": "function",
                 "function": {"name": "add", "arguments": "{\"content\":\"likes tea\"}"}},
                {"id": "2", "type": "function",
                 "function": {"name": "forget", "arguments": "{\"index\":0}"}}
            ]
        }));
        let resp = parse_chat_completion(response).unwrap();
        assert_eq!(resp.joined_text(), "了解！");
        let calls: Vec<_> = resp.tool_calls().collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments["content"], "likes tea");
        assert_eq!(calls[1].arguments["index"], 0);
    }

    #[test]
    fn test_parse_invalid_arguments_kept_raw() {
        let response = completion(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "1", "type": "function",
                 "function": {"name": "add", "arguments": "not json"}}
            ]
        }));
        let resp = parse_chat_completion(response).unwrap();
        assert_eq!(resp.parts.len(), 1);
        let call = resp.tool_calls().next().unwrap();
        assert_eq!(call.arguments, Value::String("not json".to_string()));
    }

    #[test]
    fn test_parse_null_content() {
        let response = completion(json!({"role": "assistant", "content": null}));
        let resp = parse_chat_completion(response).unwrap();
        assert!(resp.parts.is_empty());
    }

    #[test]
    fn test_parse_missing_choices() {
        let mut response = completion(json!({"role": "assistant", "content": "x"}));
        response.choices.clear();
        let err = parse_chat_completion(response).unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse(_)));
    }

    #[test]
    fn test_tools_are_function_tools() {
        let spec = ToolSpec {
            name: "forget".to_string(),
            description: "Delete an item.".to_string(),
            parameters: json!({"type": "object", "properties": {"index": {"type": "integer"}}}),
        };
        let tools = to_openai_tools(&[spec]);
        let value = serde_json::to_value(&tools).unwrap();
        assert_eq!(value[0]["type"], "function");
        assert_eq!(value[0]["function"]["name"], "forget");
        assert_eq!(value[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_base_url_defaults() {
        let client = OpenAiClient::new(None, "sk-test", 30);
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        let client = OpenAiClient::new(Some("http://localhost:8080/v1/"), "sk-test", 30);
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
