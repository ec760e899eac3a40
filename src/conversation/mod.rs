//! 会话层：系统指令模板与按频道运行的会话引擎

pub mod engine;
pub mod prompt;

pub use engine::{ConversationContext, ConversationEngine, Phase};
pub use prompt::{PromptParts, PromptTemplate, DEFAULT_TEMPLATE};
