//! 聊天平台接口（网关 / REST 之外的抽象边界）
//!
//! 平台负责投递消息事件、提供最近消息与成员昵称、发送消息与输入中提示。
//! Discord 实现见 integrations::discord；MockPlatform 供测试使用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::core::{BotError, BotResult};

/// 消息中的提及
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub id: String,
    pub username: String,
}

/// 群成员
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub username: String,
    pub nick: Option<String>,
}

/// 平台消息（入站事件与历史消息共用）
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub author_id: String,
    /// 平台用户名
    pub author_name: String,
    /// 群内昵称（若有）
    pub author_nick: Option<String>,
    pub text: String,
    pub mentions: Vec<Mention>,
    pub timestamp: DateTime<Local>,
    pub channel_id: String,
    pub group_id: Option<String>,
}

impl ChatMessage {
    /// 显示名：群昵称优先，其次用户名
    pub fn display_name(&self) -> &str {
        self.author_nick
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.author_name)
    }

    /// 同一作者、同一时刻的同一文本视为同一条消息
    pub fn is_same_message(&self, other: &ChatMessage) -> bool {
        self.author_id == other.author_id
            && self.timestamp == other.timestamp
            && self.text == other.text
    }
}

/// 聊天平台接口
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// 频道最近消息，平台原生顺序（新→旧）
    async fn fetch_recent_messages(&self, channel_id: &str, limit: usize)
        -> BotResult<Vec<ChatMessage>>;

    /// 查询单个成员（用于昵称）
    async fn fetch_member(&self, group_id: &str, user_id: &str) -> BotResult<Option<Member>>;

    /// 批量列出成员
    async fn fetch_members(&self, group_id: &str, limit: usize) -> BotResult<Vec<Member>>;

    async fn send_message(&self, channel_id: &str, text: &str) -> BotResult<()>;

    /// 显示「输入中」提示（尽力而为）
    async fn show_typing(&self, channel_id: &str) -> BotResult<()>;
}

/// 测试用平台：预置历史与成员，记录发送的消息与调用次数
#[derive(Debug, Default)]
pub struct MockPlatform {
    history: Mutex<HashMap<String, Vec<ChatMessage>>>,
    members: Mutex<HashMap<String, Member>>,
    sent: Mutex<Vec<(String, String)>>,
    typing: AtomicUsize,
    history_fetches: AtomicUsize,
    fail_history: AtomicBool,
    fail_send: AtomicBool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置频道历史（按平台原生顺序，新→旧）
    pub fn set_history(&self, channel_id: &str, newest_first: Vec<ChatMessage>) {
        self.history
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), newest_first);
    }

    pub fn add_member(&self, member: Member) {
        self.members
            .lock()
            .unwrap()
            .insert(member.id.clone(), member);
    }

    pub fn set_fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn typing_count(&self) -> usize {
        self.typing.load(Ordering::SeqCst)
    }

    pub fn history_fetch_count(&self) -> usize {
        self.history_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> BotResult<Vec<ChatMessage>> {
        self.history_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(BotError::Platform("history unavailable".to_string()));
        }
        let history = self.history.lock().unwrap();
        Ok(history
            .get(channel_id)
            .map(|m| m.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_member(&self, _group_id: &str, user_id: &str) -> BotResult<Option<Member>> {
        Ok(self.members.lock().unwrap().get(user_id).cloned())
    }

    async fn fetch_members(&self, _group_id: &str, limit: usize) -> BotResult<Vec<Member>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> BotResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(BotError::Platform("send rejected".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn show_typing(&self, _channel_id: &str) -> BotResult<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
