//! 核心：错误类型与按频道的并发闸门

pub mod error;
pub mod gate;

pub use error::{BotError, BotResult};
pub use gate::ContextGate;
