//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、按消息选择模型的路由表

pub mod mock;
pub mod openai;
pub mod router;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, DEFAULT_BASE_URL};
pub use router::{has_command_prefix, mentions_name, ModelRouter, RouteRule};
pub use traits::{
    LlmClient, LlmError, ModelRequest, ModelResponse, ResponsePart, ToolInvocation, ToolSpec,
};
