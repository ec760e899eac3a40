//! 助手错误类型
//!
//! 所有错误最终都在 Assistant / ConversationEngine 处被记录并降级为「不回复」，
//! 不会向上传播到宿主进程。

use thiserror::Error;

use crate::llm::LlmError;

/// 对话子系统可能出现的错误（模型/平台网络、记忆存储、指令解析）
#[derive(Error, Debug)]
pub enum BotError {
    /// 模型或平台的网络失败，不自动重试
    #[error("Transport error: {0}")]
    Transport(String),

    /// 记忆存储不可用：内存中的 ledger 保持当前值，下一次成功的编辑批次会整体重写
    #[error("Memory store unavailable: {0}")]
    StoreUnavailable(String),

    /// 指令引用了不存在的下标或无法解析；仅记录警告并丢弃该条指令
    #[error("Malformed directive: {0}")]
    MalformedDirective(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<LlmError> for BotError {
    fn from(e: LlmError) -> Self {
        BotError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for BotError {
    fn from(e: rusqlite::Error) -> Self {
        BotError::StoreUnavailable(e.to_string())
    }
}

pub type BotResult<T> = Result<T, BotError>;
