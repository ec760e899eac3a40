//! 记忆层：短期（频道历史窗口）、长期（按群的记忆账本）、编辑协议、持久化、昵称缓存

pub mod directive;
pub mod history;
pub mod ledger;
pub mod nick_cache;
pub mod persistence;

pub use directive::{
    EditProtocol, EditProtocolKind, IndexedProtocol, ParsedOutput, SingleSlotProtocol,
    ToolCallProtocol,
};
pub use history::{
    resolve_mentions, truncate_chars, HistoryLimits, HistoryWindow, TranscriptLine,
    HISTORY_LINE_MAX, HISTORY_MAX_CHARS, HISTORY_MAX_COUNT,
};
pub use ledger::{BatchOutcome, MemoryEdit, MemoryLedger, EMPTY_MEMORY_PLACEHOLDER};
pub use nick_cache::NickCache;
pub use persistence::{InMemoryStore, MemoryStore, SqliteMemoryStore};
