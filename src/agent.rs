//! 助手运行时：平台事件 → 会话引擎 → 回复
//!
//! 平台集成（如 Discord）只需把入站消息转换为 ChatMessage 并调用 Assistant::on_message。
//! 同一频道的消息经 ContextGate 串行处理，后到的消息总能看到先到消息的历史与记忆编辑；
//! 不同频道互不阻塞。

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::conversation::{ConversationContext, ConversationEngine, PromptTemplate};
use crate::core::ContextGate;
use crate::llm::{ModelRouter, OpenAiClient};
use crate::memory::{InMemoryStore, MemoryStore, SqliteMemoryStore};
use crate::platform::{ChatMessage, ChatPlatform};

/// 助手只在这一对群 / 频道中工作；任一缺失时不响应任何消息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTarget {
    pub group_id: Option<String>,
    pub channel_id: Option<String>,
}

impl ChannelTarget {
    pub fn new(group_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            channel_id: Some(channel_id.into()),
        }
    }

    pub fn matches(&self, message: &ChatMessage) -> bool {
        match (&self.group_id, &self.channel_id, &message.group_id) {
            (Some(group), Some(channel), Some(msg_group)) => {
                group == msg_group && *channel == message.channel_id
            }
            _ => false,
        }
    }
}

pub struct Assistant {
    engine: Arc<ConversationEngine>,
    platform: Arc<dyn ChatPlatform>,
    gate: ContextGate<ConversationContext>,
    target: ChannelTarget,
    self_id: RwLock<Option<String>>,
    typing_delay: Duration,
}

impl Assistant {
    pub fn new(
        engine: Arc<ConversationEngine>,
        platform: Arc<dyn ChatPlatform>,
        target: ChannelTarget,
    ) -> Self {
        Self {
            engine,
            platform,
            gate: ContextGate::new(64),
            target,
            self_id: RwLock::new(None),
            typing_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_typing_delay(mut self, delay: Duration) -> Self {
        self.typing_delay = delay;
        self
    }

    pub fn with_max_contexts(mut self, max_contexts: usize) -> Self {
        self.gate = ContextGate::new(max_contexts);
        self
    }

    /// 平台连接就绪后设置自身 ID，用于忽略自己发出的消息
    pub fn set_self_id(&self, id: impl Into<String>) {
        let mut guard = self.self_id.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(id.into());
    }

    fn is_self(&self, author_id: &str) -> bool {
        let guard = self.self_id.read().unwrap_or_else(|e| e.into_inner());
        guard.as_deref() == Some(author_id)
    }

    /// 处理一条入站消息；返回已发送的回复（若有）
    pub async fn on_message(&self, message: ChatMessage) -> Option<String> {
        if !self.target.matches(&message) || self.is_self(&message.author_id) {
            return None;
        }

        let channel_id = message.channel_id.clone();
        let group_id = message.group_id.clone().unwrap_or_default();

        let typing = self
            .engine
            .engages(&message.text)
            .then(|| self.spawn_typing(&channel_id).drop_guard());

        let engine = Arc::clone(&self.engine);
        let result = self
            .gate
            .with_context(
                &channel_id,
                || self.engine.load_context(&group_id, &channel_id),
                move |ctx| {
                    Box::pin(async move {
                        let reply = engine.handle_message(ctx, &message).await;
                        if let Some(text) = &reply {
                            engine.record_reply(ctx, text);
                        }
                        reply
                    })
                },
            )
            .await;
        drop(typing);

        let reply = match result {
            Ok(reply) => reply?,
            Err(e) => {
                tracing::error!(channel_id = %channel_id, error = %e, "Failed to load conversation context");
                return None;
            }
        };

        match self.platform.send_message(&channel_id, &reply).await {
            Ok(()) => Some(reply),
            Err(e) => {
                tracing::error!(channel_id = %channel_id, error = %e, "Failed to send reply");
                None
            }
        }
    }

    /// 延迟后显示「输入中」；回复就绪前取消则什么都不做
    fn spawn_typing(&self, channel_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let platform = Arc::clone(&self.platform);
        let channel_id = channel_id.to_string();
        let delay = self.typing_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = platform.show_typing(&channel_id).await {
                        tracing::debug!(channel_id = %channel_id, error = %e, "Typing indicator failed");
                    }
                }
            }
        });
        token
    }
}

/// 按配置构建记忆存储
pub fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn MemoryStore>> {
    match cfg.store.backend.as_str() {
        "sqlite" => {
            let store = SqliteMemoryStore::open(&cfg.store.path)
                .with_context(|| format!("Failed to open {}", cfg.store.path.display()))?;
            Ok(Arc::new(store))
        }
        "memory" => {
            tracing::warn!("Using in-memory store, memories are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        other => anyhow::bail!("unknown store backend: {}", other),
    }
}

/// 按配置构建助手：存储、OpenAI 兼容客户端、模型路由、编辑协议、系统指令模板
pub fn build_assistant(cfg: &AppConfig, platform: Arc<dyn ChatPlatform>) -> anyhow::Result<Assistant> {
    let api_key = cfg
        .llm
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .context("OPENAI_API_KEY (llm.api_key) is not set")?;
    let llm = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        api_key,
        cfg.llm.timeouts.request,
    ));
    let store = build_store(cfg)?;

    let router = ModelRouter::with_defaults(
        &cfg.llm.model,
        cfg.llm.boosted_model.as_deref(),
        &cfg.bot.boost_prefix,
        &cfg.bot.aliases,
    );

    let prompt = match &cfg.bot.prompt_file {
        Some(path) => PromptTemplate::from_file(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read prompt file, using default");
            PromptTemplate::default()
        }),
        None => PromptTemplate::default(),
    };

    let engine = ConversationEngine::new(llm, store, Arc::clone(&platform))
        .with_router(router)
        .with_protocol(cfg.bot.edit_protocol.build())
        .with_prompt(prompt)
        .with_name(cfg.bot.name.clone())
        .with_limits(cfg.history_limits());

    if !cfg.has_target() {
        tracing::warn!("TARGET_GUILD_ID / TARGET_CHANNEL_ID not set, the bot will not reply");
    }
    let target = ChannelTarget {
        group_id: cfg.bot.target_group_id.clone(),
        channel_id: cfg.bot.target_channel_id.clone(),
    };

    Ok(Assistant::new(Arc::new(engine), platform, target)
        .with_typing_delay(Duration::from_millis(cfg.bot.typing_delay_ms))
        .with_max_contexts(cfg.bot.max_contexts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ModelResponse};
    use crate::platform::MockPlatform;
    use chrono::Local;

    fn msg(author_id: &str, channel: &str, text: &str) -> ChatMessage {
        ChatMessage {
            author_id: author_id.to_string(),
            author_name: author_id.to_string(),
            author_nick: None,
            text: text.to_string(),
            mentions: Vec::new(),
            timestamp: Local::now(),
            channel_id: channel.to_string(),
            group_id: Some("g1".to_string()),
        }
    }

    fn assistant(target: ChannelTarget) -> (Assistant, Arc<MockLlmClient>, Arc<MockPlatform>) {
        let llm = Arc::new(MockLlmClient::new());
        let platform = Arc::new(MockPlatform::new());
        let engine = ConversationEngine::new(
            llm.clone(),
            Arc::new(InMemoryStore::new()),
            platform.clone(),
        );
        let a = Assistant::new(Arc::new(engine), platform.clone(), target);
        (a, llm, platform)
    }

    #[test]
    fn test_target_requires_both_ids() {
        let m = msg("u1", "c1", "hi");
        assert!(ChannelTarget::new("g1", "c1").matches(&m));
        assert!(!ChannelTarget::new("g1", "c2").matches(&m));
        assert!(!ChannelTarget::default().matches(&m));
        let partial = ChannelTarget {
            group_id: Some("g1".into()),
            channel_id: None,
        };
        assert!(!partial.matches(&m));
    }

    #[tokio::test]
    async fn test_ignores_other_channels_and_self() {
        let (a, llm, platform) = assistant(ChannelTarget::new("g1", "c1"));
        a.set_self_id("bot");

        assert_eq!(a.on_message(msg("u1", "c2", "AI hello")).await, None);
        assert_eq!(a.on_message(msg("bot", "c1", "AI hello")).await, None);
        assert_eq!(llm.call_count(), 0);
        assert_eq!(platform.history_fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_is_sent() {
        let (a, llm, platform) = assistant(ChannelTarget::new("g1", "c1"));
        llm.push_response(ModelResponse::text("hello!"));
        let reply = a.on_message(msg("u1", "c1", "hi AI")).await;
        assert_eq!(reply.as_deref(), Some("hello!"));
        assert_eq!(
            platform.sent_messages(),
            vec![("c1".to_string(), "hello!".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_send_returns_none_but_keeps_history() {
        let (a, llm, platform) = assistant(ChannelTarget::new("g1", "c1"));
        llm.push_response(ModelResponse::text("lost reply"));
        llm.push_response(ModelResponse::text("second"));
        platform.set_fail_send(true);
        assert_eq!(a.on_message(msg("u1", "c1", "hi AI")).await, None);
        assert!(platform.sent_messages().is_empty());

        platform.set_fail_send(false);
        let reply = a.on_message(msg("u1", "c1", "again AI")).await;
        assert_eq!(reply.as_deref(), Some("second"));
        assert!(llm.requests()[1].system.contains("AI: lost reply"));
    }
}
