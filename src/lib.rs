//! Memobot - 群聊 AI 助手
//!
//! 模块划分：
//! - **agent**: 助手运行时（平台事件 → 会话引擎 → 回复）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 系统指令模板与会话引擎
//! - **core**: 错误类型、按频道串行化的并发闸门
//! - **integrations**: 聊天平台接入（Discord）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、模型路由
//! - **memory**: 历史窗口、记忆账本、编辑协议、持久化、昵称缓存
//! - **observability**: 日志初始化
//! - **platform**: 聊天平台接口与测试用 Mock

pub mod agent;
pub mod config;
pub mod conversation;
pub mod core;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod platform;
