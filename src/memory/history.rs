//! 短期记忆：频道对话历史窗口
//!
//! 每条消息先渲染为 `[yyyy/MM/dd HH:mm:ss] 名字: 内容` 再存入（不保留结构化原文）。
//! 每次追加后剪枝：先按条数，再按 `\n` 拼接后的总字符数，从最旧的一端丢弃。

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;

use crate::platform::Mention;

/// 历史窗口最多保留的行数
pub const HISTORY_MAX_COUNT: usize = 50;
/// 历史窗口拼接后的最大字符数
pub const HISTORY_MAX_CHARS: usize = 1000;
/// 单行（含时间戳与名字）的最大字符数
pub const HISTORY_LINE_MAX: usize = 100;

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// 历史窗口的三个上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_count: usize,
    pub max_chars: usize,
    pub line_max: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_count: HISTORY_MAX_COUNT,
            max_chars: HISTORY_MAX_CHARS,
            line_max: HISTORY_LINE_MAX,
        }
    }
}

/// 一条对话记录（渲染前）
#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl TranscriptLine {
    pub fn new(
        author: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            timestamp,
        }
    }

    /// 渲染为单行并按字符截断；时间戳与名字也计入预算
    pub fn render(&self, line_max: usize) -> String {
        let line = format!(
            "[{}] {}: {}",
            self.timestamp.format(DATE_FORMAT),
            self.author,
            self.content
        );
        truncate_chars(&line, line_max)
    }
}

/// 按 Unicode 字符截断（不会切断多字节字符）
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<@!?(\d+)>").expect("valid mention regex"))
}

/// 将 `<@id>` / `<@!id>` 替换为 `@昵称`（昵称缓存）或 `@用户名`；未知引用保持原样
pub fn resolve_mentions(text: &str, mentions: &[Mention], nicks: &HashMap<String, String>) -> String {
    mention_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let id = &caps[1];
            match mentions.iter().find(|m| m.id == id) {
                Some(m) => match nicks.get(id) {
                    Some(nick) => format!("@{}", nick),
                    None => format!("@{}", m.username),
                },
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// 有界历史窗口
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    lines: Vec<String>,
    limits: HistoryLimits,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(HistoryLimits::default())
    }
}

impl HistoryWindow {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            lines: Vec::new(),
            limits,
        }
    }

    /// 追加一条已渲染的行并剪枝
    pub fn append(&mut self, line: String) {
        self.lines.push(line);
        self.trim();
    }

    /// 以平台历史填充空窗口（lines 须为旧→新顺序）
    pub fn backfill(&mut self, lines: Vec<String>) {
        self.lines.extend(lines);
        self.trim();
    }

    pub fn snapshot(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `\n` 拼接后的字符数
    pub fn joined_len(&self) -> usize {
        joined_chars(&self.lines)
    }

    fn trim(&mut self) {
        if self.lines.len() > self.limits.max_count {
            let excess = self.lines.len() - self.limits.max_count;
            self.lines.drain(..excess);
        }
        let mut total = self.joined_len();
        while total > self.limits.max_chars && !self.lines.is_empty() {
            let dropped = self.lines.remove(0);
            total = total.saturating_sub(dropped.chars().count());
            // 去掉一行也去掉了一个分隔符（最后一行除外）
            if !self.lines.is_empty() {
                total = total.saturating_sub(1);
            }
        }
    }
}

fn joined_chars(lines: &[String]) -> usize {
    let chars: usize = lines.iter().map(|l| l.chars().count()).sum();
    chars + lines.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 1, 9, 5, 7).unwrap()
    }

    #[test]
    fn test_render_format() {
        let line = TranscriptLine::new("alice", "hi", ts()).render(HISTORY_LINE_MAX);
        assert_eq!(line, "[2025/03/01 09:05:07] alice: hi");
    }

    #[test]
    fn test_render_truncates_whole_line() {
        let long = "x".repeat(500);
        let line = TranscriptLine::new("alice", long, ts()).render(HISTORY_LINE_MAX);
        assert_eq!(line.chars().count(), HISTORY_LINE_MAX);
        assert!(line.starts_with("[2025/03/01 09:05:07] alice: xxx"));
    }

    #[test]
    fn test_render_truncates_even_when_prefix_exceeds_budget() {
        let name = "名".repeat(200);
        let line = TranscriptLine::new(name, "hi", ts()).render(HISTORY_LINE_MAX);
        assert_eq!(line.chars().count(), HISTORY_LINE_MAX);
        assert!(!line.contains("hi"));
        let tiny = TranscriptLine::new("alice", "hi", ts()).render(5);
        assert_eq!(tiny, "[2025");
    }

    #[test]
    fn test_count_bound() {
        let mut window = HistoryWindow::default();
        for i in 0..80 {
            window.append(format!("{}", i % 10));
        }
        assert_eq!(window.len(), HISTORY_MAX_COUNT);
    }

    #[test]
    fn test_char_bound_drops_oldest() {
        let mut window = HistoryWindow::default();
        for i in 0..30 {
            window.append(format!("{:02}{}", i, "y".repeat(58)));
        }
        assert!(window.joined_len() <= HISTORY_MAX_CHARS);
        // 每行 60 字符 + 分隔符：最多 16 行（16*60+15 = 975）
        assert_eq!(window.len(), 16);
        assert!(window.snapshot()[0].starts_with("14"));
        assert!(window.snapshot()[15].starts_with("29"));
    }

    #[test]
    fn test_bounds_hold_for_mixed_sequences() {
        let mut window = HistoryWindow::default();
        for i in 0..500usize {
            let len = (i * 37) % 140;
            window.append("あ".repeat(len));
            assert!(window.len() <= HISTORY_MAX_COUNT);
            assert!(window.joined_len() <= HISTORY_MAX_CHARS);
            assert_eq!(window.joined_len(), window.snapshot().join("\n").chars().count());
        }
    }

    #[test]
    fn test_single_oversized_line_is_dropped() {
        let mut window = HistoryWindow::default();
        window.append("z".repeat(HISTORY_MAX_CHARS + 1));
        assert!(window.is_empty());
    }

    #[test]
    fn test_backfill_trims() {
        let mut window = HistoryWindow::default();
        window.backfill((0..60).map(|i| i.to_string()).collect());
        assert_eq!(window.len(), HISTORY_MAX_COUNT);
        assert_eq!(window.snapshot()[0], "10");
        assert_eq!(window.snapshot().last().unwrap(), "59");
    }

    #[test]
    fn test_resolve_mentions() {
        let mentions = vec![
            Mention { id: "1".into(), username: "bob".into() },
            Mention { id: "2".into(), username: "carol".into() },
        ];
        let mut nicks = HashMap::new();
        nicks.insert("1".to_string(), "Bobby".to_string());
        let out = resolve_mentions("hi <@1> and <@!2> and <@3>", &mentions, &nicks);
        assert_eq!(out, "hi @Bobby and @carol and <@3>");
    }
}
