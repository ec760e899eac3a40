//! 系统指令模板
//!
//! 占位符：{{NAME}}、{{MEMORY}}、{{EDIT_INSTRUCTIONS}}、{{HISTORY}}。单次扫描替换，
//! 记忆或历史中出现的占位符文本不会被再次展开。模板中不放时钟等易变内容，
//! 让「系统指令 + 历史」在调用之间保持为稳定前缀。

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

pub const DEFAULT_TEMPLATE: &str = "# Instructions
You are an AI taking part in a group chat. You are called \"{{NAME}}\".
Be friendly. Reply to the users' messages when it is appropriate. The past conversation is given below, with the user names, for reference.
Reply in the language the conversation is in. Write only your message, without a timestamp or a name prefix.

# Long-term memory
{{MEMORY}}

You may use this long-term memory when replying, and you can update it at any time for later conversations.
{{EDIT_INSTRUCTIONS}}

# Conversation history

{{HISTORY}}
";

/// 渲染所需的各段内容
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub name: &'a str,
    pub memory: &'a str,
    pub edit_instructions: &'a str,
    pub history: &'a str,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Z_]+)\}\}").expect("valid placeholder regex"))
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// 从文件读取模板；读取失败时返回错误由调用方决定是否回退默认模板
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        std::fs::read_to_string(path).map(Self::new)
    }

    pub fn render(&self, parts: PromptParts<'_>) -> String {
        placeholder_regex()
            .replace_all(&self.template, |caps: &regex::Captures<'_>| match &caps[1] {
                "NAME" => parts.name.to_string(),
                "MEMORY" => parts.memory.to_string(),
                "EDIT_INSTRUCTIONS" => parts.edit_instructions.to_string(),
                "HISTORY" => parts.history.to_string(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_once() {
        let t = PromptTemplate::new("{{NAME}}|{{MEMORY}}|{{HISTORY}}|{{UNKNOWN}}");
        let out = t.render(PromptParts {
            name: "AI",
            memory: "0: says {{HISTORY}}",
            edit_instructions: "",
            history: "h",
        });
        assert_eq!(out, "AI|0: says {{HISTORY}}|h|{{UNKNOWN}}");
    }

    #[test]
    fn test_default_template_has_all_sections() {
        let out = PromptTemplate::default().render(PromptParts {
            name: "AI",
            memory: "MEM",
            edit_instructions: "EDIT",
            history: "HIST",
        });
        let mem = out.find("MEM").unwrap();
        let hist = out.find("HIST").unwrap();
        assert!(out.contains("\"AI\""));
        assert!(out.contains("EDIT"));
        assert!(mem < hist);
        assert!(!out.contains("{{"));
    }
}
