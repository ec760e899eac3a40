//! 记忆编辑协议：从模型输出中提取记忆编辑指令，并分离出用户可见的回复
//!
//! 三种实现共用 EditProtocol 接口，由配置 `bot.edit_protocol` 选择其一：
//! - `single_slot`：`UPDATE_MEMORY: ...` 行整体替换记忆（只取第一行）
//! - `indexed`：`ADD <text>` / `UPDATE <index> <text>` / `FORGET <index>` 行
//! - `tool_calls`：结构化工具调用 add / update / forget

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::core::{BotError, BotResult};
use crate::llm::{ModelResponse, ToolInvocation, ToolSpec};
use crate::memory::MemoryEdit;

/// 单槽模式的行前缀
pub const SINGLE_SLOT_MARKER: &str = "UPDATE_MEMORY:";

pub const CMD_ADD: &str = "ADD";
pub const CMD_UPDATE: &str = "UPDATE";
pub const CMD_FORGET: &str = "FORGET";

/// 解析结果：可见回复（去除指令行后为空则为 None）与按顺序收集的编辑
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub reply: Option<String>,
    pub edits: Vec<MemoryEdit>,
}

/// 记忆编辑协议
pub trait EditProtocol: Send + Sync {
    fn name(&self) -> &str;

    /// 拼入系统指令的「如何编辑记忆」说明
    fn instructions(&self) -> &str;

    /// 随请求提供给模型的工具（内联协议为空）
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    fn extract(&self, response: &ModelResponse) -> ParsedOutput;
}

/// 配置中的协议选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditProtocolKind {
    SingleSlot,
    Indexed,
    #[default]
    ToolCalls,
}

impl EditProtocolKind {
    pub fn build(self) -> Arc<dyn EditProtocol> {
        match self {
            EditProtocolKind::SingleSlot => Arc::new(SingleSlotProtocol),
            EditProtocolKind::Indexed => Arc::new(IndexedProtocol),
            EditProtocolKind::ToolCalls => Arc::new(ToolCallProtocol),
        }
    }
}

fn visible_reply(lines: Vec<&str>) -> Option<String> {
    let reply = lines.join("\n").trim().to_string();
    if reply.is_empty() {
        None
    } else {
        Some(reply)
    }
}

/// 单槽替换：`UPDATE_MEMORY: 记忆内容`
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleSlotProtocol;

impl EditProtocol for SingleSlotProtocol {
    fn name(&self) -> &str {
        "single_slot"
    }

    fn instructions(&self) -> &str {
        "To update your long-term memory, add a new line in this exact format, on one line, \
containing everything you want to keep remembering. Anything you do not write there is lost.\n\n\
UPDATE_MEMORY: <memory content>"
    }

    fn extract(&self, response: &ModelResponse) -> ParsedOutput {
        let text = response.joined_text();
        let mut replacement = None;
        let mut kept = Vec::new();
        for line in text.lines() {
            match line.trim_start().strip_prefix(SINGLE_SLOT_MARKER) {
                Some(rest) => {
                    if replacement.is_none() {
                        replacement = Some(rest.trim().to_string());
                    }
                }
                None => kept.push(line),
            }
        }
        ParsedOutput {
            reply: visible_reply(kept),
            edits: replacement.map(MemoryEdit::ReplaceAll).into_iter().collect(),
        }
    }
}

/// 按下标批量编辑：ADD / UPDATE / FORGET 行
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedProtocol;

/// 在第一段空白处切分，返回 (首字段, 其余部分)
fn split_field(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// 若该行是指令行，返回解析结果（Err 表示指令格式错误）；普通行返回 None
fn parse_command_line(line: &str) -> Option<BotResult<MemoryEdit>> {
    let (keyword, rest) = split_field(line);
    let parsed = match keyword {
        CMD_ADD => {
            let text = rest.trim();
            if text.is_empty() {
                Err("ADD without content".to_string())
            } else {
                Ok(MemoryEdit::Add(text.to_string()))
            }
        }
        CMD_UPDATE => {
            let (index, text) = split_field(rest);
            match index.parse::<usize>() {
                Ok(i) if !text.trim().is_empty() => Ok(MemoryEdit::Update(i, text.trim().to_string())),
                Ok(_) => Err("UPDATE without content".to_string()),
                Err(_) => Err(format!("UPDATE with invalid index {:?}", index)),
            }
        }
        CMD_FORGET => match rest.trim().parse::<usize>() {
            Ok(i) => Ok(MemoryEdit::Forget(i)),
            Err(_) => Err(format!("FORGET with invalid index {:?}", rest.trim())),
        },
        _ => return None,
    };
    Some(parsed.map_err(BotError::MalformedDirective))
}

impl EditProtocol for IndexedProtocol {
    fn name(&self) -> &str {
        "indexed"
    }

    fn instructions(&self) -> &str {
        "Your long-term memory is the numbered list above. To edit it, write command lines, \
one per line, anywhere in your answer. They are removed before your answer is shown:\n\
ADD <text>            remember a new item\n\
UPDATE <index> <text> replace item <index>\n\
FORGET <index>        delete item <index>\n\
Indices always refer to the list exactly as shown above."
    }

    fn extract(&self, response: &ModelResponse) -> ParsedOutput {
        let text = response.joined_text();
        let mut edits = Vec::new();
        let mut kept = Vec::new();
        for line in text.lines() {
            match parse_command_line(line) {
                Some(Ok(edit)) => edits.push(edit),
                Some(Err(e)) => {
                    tracing::warn!(line = %line.trim(), error = %e, "Dropping malformed memory directive");
                }
                None => kept.push(line),
            }
        }
        ParsedOutput {
            reply: visible_reply(kept),
            edits,
        }
    }
}

/// add 工具参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddArgs {
    /// 要记住的新内容（一行）
    pub content: String,
}

/// update 工具参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateArgs {
    /// 记忆列表中的下标（从 0 开始）
    pub index: usize,
    /// 替换后的内容
    pub content: String,
}

/// forget 工具参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForgetArgs {
    /// 要删除的记忆下标（从 0 开始）
    pub index: usize,
}

fn parameters_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    });
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// 结构化工具调用：add(content) / update(index, content) / forget(index)
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallProtocol;

impl ToolCallProtocol {
    fn to_edit(call: &ToolInvocation) -> BotResult<MemoryEdit> {
        let args = call.arguments.clone();
        let err = |e: serde_json::Error| {
            BotError::MalformedDirective(format!("invalid arguments for {}: {}", call.name, e))
        };
        match call.name.as_str() {
            "add" => {
                let a: AddArgs = serde_json::from_value(args).map_err(err)?;
                Ok(MemoryEdit::Add(a.content))
            }
            "update" => {
                let a: UpdateArgs = serde_json::from_value(args).map_err(err)?;
                Ok(MemoryEdit::Update(a.index, a.content))
            }
            "forget" => {
                let a: ForgetArgs = serde_json::from_value(args).map_err(err)?;
                Ok(MemoryEdit::Forget(a.index))
            }
            other => Err(BotError::MalformedDirective(format!("unknown tool {}", other))),
        }
    }
}

impl EditProtocol for ToolCallProtocol {
    fn name(&self) -> &str {
        "tool_calls"
    }

    fn instructions(&self) -> &str {
        "Your long-term memory is the numbered list above. Use the add, update and forget tools \
to change it. Indices always refer to the list exactly as shown above. You may call tools and \
reply in the same answer."
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "add".to_string(),
                description: "Remember a new item in long-term memory.".to_string(),
                parameters: parameters_schema::<AddArgs>(),
            },
            ToolSpec {
                name: "update".to_string(),
                description: "Replace the memory item at the given index.".to_string(),
                parameters: parameters_schema::<UpdateArgs>(),
            },
            ToolSpec {
                name: "forget".to_string(),
                description: "Delete the memory item at the given index.".to_string(),
                parameters: parameters_schema::<ForgetArgs>(),
            },
        ]
    }

    fn extract(&self, response: &ModelResponse) -> ParsedOutput {
        let mut edits = Vec::new();
        for call in response.tool_calls() {
            match Self::to_edit(call) {
                Ok(edit) => edits.push(edit),
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "Dropping malformed memory tool call");
                }
            }
        }
        let text = response.joined_text();
        ParsedOutput {
            reply: visible_reply(text.lines().collect()),
            edits,
        }
    }
}
