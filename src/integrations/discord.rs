//! Discord 集成（serenity 网关 + REST）
//!
//! DiscordPlatform 实现 ChatPlatform；Handler 把网关消息转换为 ChatMessage 交给 Assistant。

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serenity::all::{
    ChannelId, Context, EventHandler, GatewayIntents, GetMessages, GuildId, Http, Message, Ready,
    UserId,
};

use crate::agent::{build_assistant, Assistant};
use crate::config::AppConfig;
use crate::core::{BotError, BotResult};
use crate::platform::{ChatMessage, ChatPlatform, Member, Mention};

/// Discord 单条消息长度上限
const MESSAGE_MAX_LEN: usize = 2000;
/// 单次拉取消息数上限（Discord API 限制）
const FETCH_MAX: usize = 100;
/// 单次列出成员数上限（Discord API 限制）
const MEMBERS_MAX: usize = 1000;

pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }
}

fn parse_id(kind: &str, raw: &str) -> BotResult<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| BotError::Platform(format!("invalid {} id: {:?}", kind, raw)))
}

fn platform_err(action: &str, e: serenity::Error) -> BotError {
    BotError::Platform(format!("{}: {}", action, e))
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> BotResult<Vec<ChatMessage>> {
        let channel = ChannelId::new(parse_id("channel", channel_id)?);
        let builder = GetMessages::new().limit(limit.clamp(1, FETCH_MAX) as u8);
        let messages = channel
            .messages(&*self.http, builder)
            .await
            .map_err(|e| platform_err("failed to fetch channel history", e))?;
        Ok(messages.iter().map(to_chat_message).collect())
    }

    async fn fetch_member(&self, group_id: &str, user_id: &str) -> BotResult<Option<Member>> {
        let guild = GuildId::new(parse_id("guild", group_id)?);
        let user = UserId::new(parse_id("user", user_id)?);
        let member = guild
            .member(&*self.http, user)
            .await
            .map_err(|e| platform_err("failed to fetch member", e))?;
        Ok(Some(Member {
            id: member.user.id.to_string(),
            username: member.user.name.clone(),
            nick: member.nick.clone(),
        }))
    }

    async fn fetch_members(&self, group_id: &str, limit: usize) -> BotResult<Vec<Member>> {
        let guild = GuildId::new(parse_id("guild", group_id)?);
        let members = guild
            .members(&*self.http, Some(limit.clamp(1, MEMBERS_MAX) as u64), None::<UserId>)
            .await
            .map_err(|e| platform_err("failed to list members", e))?;
        Ok(members
            .into_iter()
            .map(|m| Member {
                id: m.user.id.to_string(),
                username: m.user.name.clone(),
                nick: m.nick,
            })
            .collect())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> BotResult<()> {
        let channel = ChannelId::new(parse_id("channel", channel_id)?);
        for chunk in split_message(text, MESSAGE_MAX_LEN) {
            channel
                .say(&*self.http, &chunk)
                .await
                .map_err(|e| platform_err("failed to send message", e))?;
        }
        Ok(())
    }

    async fn show_typing(&self, channel_id: &str) -> BotResult<()> {
        let channel = ChannelId::new(parse_id("channel", channel_id)?);
        channel
            .broadcast_typing(&*self.http)
            .await
            .map_err(|e| platform_err("failed to broadcast typing", e))
    }
}

/// 网关消息 → ChatMessage
pub fn to_chat_message(message: &Message) -> ChatMessage {
    let timestamp = Local
        .timestamp_opt(message.timestamp.unix_timestamp(), 0)
        .single()
        .unwrap_or_else(Local::now);
    ChatMessage {
        author_id: message.author.id.to_string(),
        author_name: message.author.name.clone(),
        author_nick: message.member.as_ref().and_then(|m| m.nick.clone()),
        text: message.content.clone(),
        mentions: message
            .mentions
            .iter()
            .map(|u| Mention {
                id: u.id.to_string(),
                username: u.name.clone(),
            })
            .collect(),
        timestamp,
        channel_id: message.channel_id.to_string(),
        group_id: message.guild_id.map(|g| g.to_string()),
    }
}

/// 按字符上限切分，优先在换行或空格处断开
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let end = match remaining.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };
        let head = &remaining[..end];
        let split_at = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .filter(|i| *i > 0)
            .unwrap_or(end);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}

struct Handler {
    assistant: Arc<Assistant>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot_name = %ready.user.name, guilds = ready.guilds.len(), "Discord connected");
        self.assistant.set_self_id(ready.user.id.to_string());
    }

    async fn message(&self, _ctx: Context, message: Message) {
        self.assistant.on_message(to_chat_message(&message)).await;
    }
}

/// 连接 Discord 网关并运行至 Ctrl-C
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let token = cfg
        .bot
        .discord_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .context("DISCORD_TOKEN (bot.discord_token) is not set")?;

    let platform = Arc::new(DiscordPlatform::new(&token));
    let assistant = Arc::new(build_assistant(&cfg, platform)?);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let mut client = serenity::Client::builder(&token, intents)
        .event_handler(Handler { assistant })
        .await
        .context("Failed to build Discord client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await.context("Discord gateway error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_prefers_newlines() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        assert_eq!(split_message(&text, 15), vec!["a".repeat(10), "b".repeat(10)]);
        assert_eq!(split_message("short", 15), vec!["short".to_string()]);
    }

    #[test]
    fn test_split_message_counts_chars() {
        let text = "あ".repeat(5);
        assert_eq!(split_message(&text, 2), vec!["ああ", "ああ", "あ"]);
    }

    #[test]
    fn test_parse_id_rejects_zero_and_garbage() {
        assert_eq!(parse_id("channel", " 42 ").unwrap(), 42);
        assert!(parse_id("channel", "0").is_err());
        assert!(parse_id("channel", "abc").is_err());
    }
}
