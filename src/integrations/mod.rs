//! 外部集成：聊天平台接入（需对应 feature）

#[cfg(feature = "discord")]
pub mod discord;
