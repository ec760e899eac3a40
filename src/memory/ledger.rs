//! 长期记忆账本：按位置编号的自由文本条目
//!
//! 一次模型响应中的所有编辑作为一个批次应用：
//! UPDATE / FORGET 按发给模型的快照中的原始下标寻址，ADD 在其后追加，最后重新压紧编号。
//! 下标只在该快照内有效。

use std::fmt;

use crate::core::BotError;

/// 空记忆时在 prompt 中显示的占位文本
pub const EMPTY_MEMORY_PLACEHOLDER: &str = "(nothing remembered yet)";

/// 单条记忆编辑
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEdit {
    /// 追加一条新记忆
    Add(String),
    /// 替换快照中 index 处的条目
    Update(usize, String),
    /// 删除快照中 index 处的条目
    Forget(usize),
    /// 用一行文本替换全部记忆（单槽模式）
    ReplaceAll(String),
}

impl fmt::Display for MemoryEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryEdit::Add(text) => write!(f, "ADD {}", text),
            MemoryEdit::Update(i, text) => write!(f, "UPDATE {} {}", i, text),
            MemoryEdit::Forget(i) => write!(f, "FORGET {}", i),
            MemoryEdit::ReplaceAll(text) => write!(f, "REPLACE_ALL {}", text),
        }
    }
}

/// 批次应用结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub rejected: usize,
}

impl BatchOutcome {
    pub fn changed(&self) -> bool {
        self.applied > 0
    }
}

/// 记忆账本
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    entries: Vec<String>,
}

impl MemoryLedger {
    pub fn new(entries: Vec<String>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| normalize_entry(&e))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// 从存储格式（按行分隔）解析；空行被忽略
    pub fn from_blob(blob: &str) -> Self {
        Self::new(blob.lines().map(String::from).collect())
    }

    /// 存储格式：条目以 `\n` 连接
    pub fn to_blob(&self) -> String {
        self.entries.join("\n")
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 渲染为 `<index>: <entry>` 行，供 prompt 使用
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return EMPTY_MEMORY_PLACEHOLDER.to_string();
        }
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}: {}", i, e))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 以快照语义应用一批编辑；无效编辑记录警告后丢弃，不中断批次
    pub fn apply_batch(&mut self, edits: &[MemoryEdit]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut slots: Vec<Option<String>> = self.entries.iter().cloned().map(Some).collect();
        let mut replaced = false;
        let mut replacement: Option<String> = None;
        let mut appended: Vec<String> = Vec::new();

        for edit in edits {
            let result = match edit {
                MemoryEdit::Add(text) => {
                    let text = normalize_entry(text);
                    if text.is_empty() {
                        Err(malformed(edit, "empty content"))
                    } else {
                        appended.push(text);
                        Ok(())
                    }
                }
                MemoryEdit::Update(index, text) => {
                    let text = normalize_entry(text);
                    match slots.get_mut(*index) {
                        _ if text.is_empty() => Err(malformed(edit, "empty content")),
                        Some(slot) if slot.is_some() => {
                            *slot = Some(text);
                            Ok(())
                        }
                        _ => Err(malformed(edit, "index not in snapshot")),
                    }
                }
                MemoryEdit::Forget(index) => match slots.get_mut(*index) {
                    Some(slot) if slot.is_some() => {
                        *slot = None;
                        Ok(())
                    }
                    _ => Err(malformed(edit, "index not in snapshot")),
                },
                // 空内容表示清空全部记忆
                MemoryEdit::ReplaceAll(text) => {
                    if replaced {
                        Err(malformed(edit, "memory already replaced in this batch"))
                    } else {
                        let text = normalize_entry(text);
                        slots.iter_mut().for_each(|s| *s = None);
                        replaced = true;
                        replacement = Some(text).filter(|t| !t.is_empty());
                        Ok(())
                    }
                }
            };

            match result {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    outcome.rejected += 1;
                    tracing::warn!(
                        error = %e,
                        ledger_len = self.entries.len(),
                        "Dropping memory edit"
                    );
                }
            }
        }

        if outcome.changed() {
            self.entries = replacement
                .into_iter()
                .chain(slots.into_iter().flatten())
                .chain(appended)
                .collect();
        }
        outcome
    }
}

fn malformed(edit: &MemoryEdit, reason: &str) -> BotError {
    BotError::MalformedDirective(format!("{}: {}", edit, reason))
}

/// 条目为单行文本：换行折叠为空格，首尾去空白，去掉成对的外层双引号
fn normalize_entry(text: &str) -> String {
    let flat = text.split(['\n', '\r']).collect::<Vec<_>>().join(" ");
    let trimmed = flat.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(items: &[&str]) -> MemoryLedger {
        MemoryLedger::new(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_update_and_forget_use_snapshot_indices() {
        let mut l = ledger(&["a", "b", "c"]);
        let outcome = l.apply_batch(&[
            MemoryEdit::Update(2, "\"new text\"".into()),
            MemoryEdit::Forget(0),
        ]);
        assert_eq!(outcome, BatchOutcome { applied: 2, rejected: 0 });
        assert_eq!(l.entries(), &["b".to_string(), "new text".to_string()]);
    }

    #[test]
    fn test_adds_are_appended_after_updates_and_forgets() {
        let mut l = ledger(&["a", "b"]);
        l.apply_batch(&[
            MemoryEdit::Add("c".into()),
            MemoryEdit::Forget(1),
            MemoryEdit::Update(0, "A".into()),
        ]);
        assert_eq!(l.entries(), &["A".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_out_of_range_forget_leaves_ledger_unchanged() {
        let mut l = ledger(&["a", "b"]);
        let outcome = l.apply_batch(&[MemoryEdit::Forget(5)]);
        assert!(!outcome.changed());
        assert_eq!(outcome.rejected, 1);
        assert_eq!(l, ledger(&["a", "b"]));
    }

    #[test]
    fn test_forget_wins_over_update_of_same_index() {
        let mut l = ledger(&["a", "b"]);
        l.apply_batch(&[MemoryEdit::Update(0, "x".into()), MemoryEdit::Forget(0)]);
        assert_eq!(l.entries(), &["b".to_string()]);

        let mut l = ledger(&["a", "b"]);
        let outcome = l.apply_batch(&[MemoryEdit::Forget(0), MemoryEdit::Update(0, "x".into())]);
        assert_eq!(outcome, BatchOutcome { applied: 1, rejected: 1 });
        assert_eq!(l.entries(), &["b".to_string()]);
    }

    #[test]
    fn test_replace_all() {
        let mut l = ledger(&["a", "b"]);
        l.apply_batch(&[MemoryEdit::ReplaceAll("everything in one line".into())]);
        assert_eq!(l.entries(), &["everything in one line".to_string()]);
    }

    #[test]
    fn test_replace_all_with_empty_content_clears_memory() {
        let mut l = ledger(&["a", "b"]);
        let outcome = l.apply_batch(&[MemoryEdit::ReplaceAll("  ".into())]);
        assert!(outcome.changed());
        assert!(l.is_empty());
        assert_eq!(l.to_blob(), "");
        assert_eq!(l.render(), EMPTY_MEMORY_PLACEHOLDER);
    }

    #[test]
    fn test_rejection_is_reported_as_malformed_directive() {
        let err = malformed(&MemoryEdit::Forget(5), "index not in snapshot");
        assert!(matches!(err, BotError::MalformedDirective(_)));
        assert_eq!(
            err.to_string(),
            "Malformed directive: FORGET 5: index not in snapshot"
        );
    }

    #[test]
    fn test_second_replace_all_is_rejected() {
        let mut l = ledger(&["a"]);
        let outcome = l.apply_batch(&[
            MemoryEdit::ReplaceAll("first".into()),
            MemoryEdit::ReplaceAll("second".into()),
        ]);
        assert_eq!(outcome, BatchOutcome { applied: 1, rejected: 1 });
        assert_eq!(l.entries(), &["first".to_string()]);
    }

    #[test]
    fn test_bad_edits_do_not_abort_batch() {
        let mut l = ledger(&["a"]);
        let outcome = l.apply_batch(&[
            MemoryEdit::Update(9, "nope".into()),
            MemoryEdit::Add("  ".into()),
            MemoryEdit::Add("kept".into()),
        ]);
        assert_eq!(outcome, BatchOutcome { applied: 1, rejected: 2 });
        assert_eq!(l.entries(), &["a".to_string(), "kept".to_string()]);
    }

    #[test]
    fn test_blob_round_trip_and_render() {
        let l = ledger(&["likes tea", "birthday is 3/1"]);
        let blob = l.to_blob();
        assert_eq!(blob, "likes tea\nbirthday is 3/1");
        assert_eq!(MemoryLedger::from_blob(&blob), l);
        assert_eq!(l.render(), "0: likes tea\n1: birthday is 3/1");
        assert_eq!(MemoryLedger::default().render(), EMPTY_MEMORY_PLACEHOLDER);
    }

    #[test]
    fn test_multiline_entry_is_flattened() {
        let mut l = MemoryLedger::default();
        l.apply_batch(&[MemoryEdit::Add("line one\nline two".into())]);
        assert_eq!(l.entries(), &["line one line two".to_string()]);
        assert_eq!(MemoryLedger::from_blob(&l.to_blob()), l);
    }
}
