//! 会话引擎：历史窗口 + 记忆账本 → prompt → 模型 → 记忆编辑 → 回复
//!
//! 每个频道一个 ConversationContext（COLD → WARM，调用模型期间为 BUSY）。
//! 引擎本身无状态，可被多个频道共享；对同一上下文的串行化由 ContextGate 负责。
//! 任何错误（模型、存储、平台）都只记录日志并降级为「不回复」。

use std::sync::Arc;

use chrono::Local;

use crate::conversation::prompt::{PromptParts, PromptTemplate};
use crate::core::BotResult;
use crate::llm::{LlmClient, ModelRequest, ModelRouter};
use crate::memory::{
    resolve_mentions, EditProtocol, EditProtocolKind, HistoryLimits, HistoryWindow,
    MemoryLedger, MemoryStore, NickCache, TranscriptLine,
};
use crate::platform::{ChatMessage, ChatPlatform};

/// 回填历史时顺带拉取的成员数上限（用于昵称缓存）
const MEMBER_PREFETCH_LIMIT: usize = 1000;

/// 上下文所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 尚未加载历史
    Cold,
    /// 历史已就绪
    Warm,
    /// 模型调用进行中
    Busy,
}

/// 单个频道的会话上下文
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub group_id: String,
    pub channel_id: String,
    pub ledger: MemoryLedger,
    pub history: HistoryWindow,
    pub nicks: NickCache,
    phase: Phase,
}

impl ConversationContext {
    pub fn new(
        group_id: impl Into<String>,
        channel_id: impl Into<String>,
        ledger: MemoryLedger,
        limits: HistoryLimits,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            channel_id: channel_id.into(),
            ledger,
            history: HistoryWindow::new(limits),
            nicks: NickCache::new(),
            phase: Phase::Cold,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// 会话引擎
pub struct ConversationEngine {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn MemoryStore>,
    platform: Arc<dyn ChatPlatform>,
    router: ModelRouter,
    protocol: Arc<dyn EditProtocol>,
    prompt: PromptTemplate,
    name: String,
    limits: HistoryLimits,
}

impl ConversationEngine {
    /// 默认：名字 "AI"（含全角 ＡＩ）、默认模型 gpt-4.1-mini、工具调用协议
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn MemoryStore>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        let names = vec!["AI".to_string(), "ＡＩ".to_string()];
        Self {
            llm,
            store,
            platform,
            router: ModelRouter::with_defaults("gpt-4.1-mini", None, "!boost", &names),
            protocol: EditProtocolKind::default().build(),
            prompt: PromptTemplate::default(),
            name: "AI".to_string(),
            limits: HistoryLimits::default(),
        }
    }

    pub fn with_router(mut self, router: ModelRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_protocol(mut self, protocol: Arc<dyn EditProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_limits(mut self, limits: HistoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 该消息是否会触发模型调用
    pub fn engages(&self, text: &str) -> bool {
        self.router.select(text).is_some()
    }

    /// 创建上下文：从存储加载该群的记忆；历史为空，首次使用时回填
    pub async fn load_context(
        &self,
        group_id: &str,
        channel_id: &str,
    ) -> BotResult<ConversationContext> {
        let ledger = match self.store.read(group_id).await? {
            Some(blob) => MemoryLedger::from_blob(&blob),
            None => MemoryLedger::default(),
        };
        tracing::info!(
            group_id,
            channel_id,
            entries = ledger.len(),
            "Loaded conversation context"
        );
        Ok(ConversationContext::new(group_id, channel_id, ledger, self.limits))
    }

    /// 处理一条入站消息：记入历史，必要时调用模型并应用记忆编辑，返回可见回复
    pub async fn handle_message(
        &self,
        ctx: &mut ConversationContext,
        message: &ChatMessage,
    ) -> Option<String> {
        self.observe(ctx, message).await;

        let model = self.router.select(&message.text)?.to_string();

        ctx.phase = Phase::Busy;
        let result = self.respond(ctx, &model).await;
        ctx.phase = Phase::Warm;

        match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    channel_id = %ctx.channel_id,
                    error = %e,
                    "Error getting response"
                );
                None
            }
        }
    }

    /// 把助手自己的回复记入历史
    pub fn record_reply(&self, ctx: &mut ConversationContext, text: &str) {
        let line = TranscriptLine::new(self.name.clone(), text, Local::now())
            .render(self.limits.line_max);
        ctx.history.append(line);
    }

    /// 记入历史。窗口为空时先从平台回填；这条消息总是最后一行
    pub async fn observe(&self, ctx: &mut ConversationContext, message: &ChatMessage) {
        ctx.nicks
            .set(message.author_id.clone(), message.author_nick.clone());

        if ctx.history.is_empty() {
            self.backfill(ctx, message).await;
        }

        let line = self.format_message(ctx, message).await;
        ctx.history.append(line);
        ctx.phase = Phase::Warm;
    }

    /// 从平台拉取最近消息填充历史，跳过 message 本身（由调用方追加在最后）
    async fn backfill(&self, ctx: &mut ConversationContext, message: &ChatMessage) {
        if !ctx.group_id.is_empty() {
            match self
                .platform
                .fetch_members(&ctx.group_id, MEMBER_PREFETCH_LIMIT)
                .await
            {
                Ok(members) => {
                    for m in members {
                        if m.nick.is_some() {
                            ctx.nicks.set(m.id, m.nick);
                        }
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Member prefetch failed"),
            }
        }

        let fetched = match self
            .platform
            .fetch_recent_messages(&ctx.channel_id, self.limits.max_count)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(channel_id = %ctx.channel_id, error = %e, "History backfill failed");
                return;
            }
        };

        // 拉取结果可能包含触发消息，且不一定是最新一条
        let fetched: Vec<ChatMessage> = fetched
            .into_iter()
            .filter(|m| !m.is_same_message(message))
            .collect();

        for m in &fetched {
            if m.author_nick.is_some() {
                ctx.nicks.set(m.author_id.clone(), m.author_nick.clone());
            }
        }

        let mut lines = Vec::with_capacity(fetched.len());
        for m in fetched.iter().rev() {
            lines.push(self.format_message(ctx, m).await);
        }
        ctx.history.backfill(lines);
        tracing::info!(
            channel_id = %ctx.channel_id,
            fetched = fetched.len(),
            kept = ctx.history.len(),
            "Backfilled channel history"
        );
    }

    /// 渲染一条消息：提及替换为昵称/用户名，整行截断
    async fn format_message(&self, ctx: &mut ConversationContext, message: &ChatMessage) -> String {
        if let Some(group_id) = message.group_id.as_deref() {
            for mention in &message.mentions {
                let platform = Arc::clone(&self.platform);
                ctx.nicks
                    .get_or_fetch(&mention.id, |id| async move {
                        match platform.fetch_member(group_id, &id).await {
                            Ok(member) => member.and_then(|m| m.nick),
                            Err(e) => {
                                tracing::debug!(user_id = %id, error = %e, "Nickname lookup failed");
                                None
                            }
                        }
                    })
                    .await;
            }
        }
        let content = resolve_mentions(&message.text, &message.mentions, ctx.nicks.as_map());
        TranscriptLine::new(message.display_name(), content, message.timestamp)
            .render(self.limits.line_max)
    }

    /// 构建请求：历史中除最新一行外进入系统指令，最新一行作为用户输入
    fn build_request(&self, ctx: &ConversationContext, model: &str) -> Option<ModelRequest> {
        let (newest, earlier) = ctx.history.snapshot().split_last()?;
        let memory = ctx.ledger.render();
        let history = earlier.join("\n");
        let system = self.prompt.render(PromptParts {
            name: &self.name,
            memory: &memory,
            edit_instructions: self.protocol.instructions(),
            history: &history,
        });
        Some(ModelRequest {
            model: model.to_string(),
            system,
            input: newest.clone(),
            tools: self.protocol.tools(),
        })
    }

    async fn respond(
        &self,
        ctx: &mut ConversationContext,
        model: &str,
    ) -> BotResult<Option<String>> {
        let Some(request) = self.build_request(ctx, model) else {
            tracing::warn!(channel_id = %ctx.channel_id, "History is empty, nothing to answer");
            return Ok(None);
        };

        tracing::debug!(model, protocol = self.protocol.name(), "Calling model");
        let response = self.llm.generate(&request).await?;
        tracing::debug!(parts = response.parts.len(), "Model responded");

        let parsed = self.protocol.extract(&response);
        if !parsed.edits.is_empty() {
            let outcome = ctx.ledger.apply_batch(&parsed.edits);
            if outcome.changed() {
                self.store
                    .write(&ctx.group_id, &ctx.ledger.to_blob())
                    .await?;
                tracing::info!(
                    group_id = %ctx.group_id,
                    applied = outcome.applied,
                    rejected = outcome.rejected,
                    entries = ctx.ledger.len(),
                    "Updated memory"
                );
            }
        }

        Ok(parsed.reply)
    }
}
