//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MEMOBOT__*` 覆盖（双下划线表示嵌套，如 `MEMOBOT__LLM__MODEL=gpt-4.1`），
//! 最后兼容扁平环境变量 DISCORD_TOKEN / OPENAI_API_KEY / OPENAI_API_URL / TARGET_GUILD_ID / TARGET_CHANNEL_ID。

use std::path::PathBuf;

use serde::Deserialize;

use crate::memory::{EditProtocolKind, HistoryLimits};
use crate::memory::{HISTORY_LINE_MAX, HISTORY_MAX_CHARS, HISTORY_MAX_COUNT};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotSection,
    pub history: HistorySection,
    pub llm: LlmSection,
    pub store: StoreSection,
}

/// [bot] 段：名字、目标群/频道、记忆编辑协议、输入提示延迟
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSection {
    /// 助手在对话历史中的显示名
    pub name: String,
    /// 触发响应的名字写法（大小写不敏感，含全角）
    pub aliases: Vec<String>,
    pub target_group_id: Option<String>,
    pub target_channel_id: Option<String>,
    pub discord_token: Option<String>,
    pub edit_protocol: EditProtocolKind,
    /// 增强模型的前缀命令
    pub boost_prefix: String,
    /// 模型调用多久未完成后显示「输入中」
    pub typing_delay_ms: u64,
    /// 同时保留的会话上下文上限（LRU 淘汰）
    pub max_contexts: usize,
    /// 自定义系统指令模板（含 {{MEMORY}} / {{HISTORY}} 等占位符）
    pub prompt_file: Option<PathBuf>,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            name: "AI".to_string(),
            aliases: vec!["AI".to_string(), "ＡＩ".to_string()],
            target_group_id: None,
            target_channel_id: None,
            discord_token: None,
            edit_protocol: EditProtocolKind::default(),
            boost_prefix: "!boost".to_string(),
            typing_delay_ms: 1000,
            max_contexts: 64,
            prompt_file: None,
        }
    }
}

/// [history] 段：历史窗口上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub max_count: usize,
    pub max_chars: usize,
    pub line_max: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_count: HISTORY_MAX_COUNT,
            max_chars: HISTORY_MAX_CHARS,
            line_max: HISTORY_LINE_MAX,
        }
    }
}

/// [llm] 段：模型、端点与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    /// 前缀命令触发的增强模型；未设置时不启用
    pub boosted_model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            boosted_model: None,
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [store] 段：记忆存储后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// sqlite / memory
    pub backend: String,
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("db.sqlite"),
        }
    }
}

impl AppConfig {
    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_count: self.history.max_count.max(1),
            max_chars: self.history.max_chars,
            line_max: self.history.line_max,
        }
    }

    /// 目标群与频道都配置了才会响应
    pub fn has_target(&self) -> bool {
        non_empty(&self.bot.target_group_id) && non_empty(&self.bot.target_channel_id)
    }
}

fn non_empty(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// 扁平环境变量 -> 配置键
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DISCORD_TOKEN", "bot.discord_token"),
    ("OPENAI_API_KEY", "llm.api_key"),
    ("OPENAI_API_URL", "llm.base_url"),
    ("TARGET_GUILD_ID", "bot.target_group_id"),
    ("TARGET_CHANNEL_ID", "bot.target_channel_id"),
];

/// 从 config 目录加载配置，环境变量 MEMOBOT__* 与扁平变量可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 MEMOBOT__*（双下划线表示嵌套键）
/// 4. 扁平环境变量（非空时）最后覆盖
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MEMOBOT")
            .separator("__")
            .try_parsing(true),
    );

    for (var, key) in LEGACY_ENV {
        let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(*key, value)?;
    }

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bot.name, "AI");
        assert_eq!(cfg.bot.edit_protocol, EditProtocolKind::ToolCalls);
        assert_eq!(cfg.history_limits(), HistoryLimits::default());
        assert_eq!(cfg.bot.typing_delay_ms, 1000);
        assert!(!cfg.has_target());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[bot]
name = "Memo"
aliases = ["memo"]
target_group_id = "100"
target_channel_id = "200"
edit_protocol = "indexed"

[history]
max_count = 10

[llm]
model = "gpt-4.1"
boosted_model = "o3"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.bot.aliases, vec!["memo".to_string()]);
        assert_eq!(cfg.bot.edit_protocol, EditProtocolKind::Indexed);
        assert_eq!(cfg.history.max_count, 10);
        assert_eq!(cfg.history.max_chars, HISTORY_MAX_CHARS);
        assert_eq!(cfg.llm.boosted_model.as_deref(), Some("o3"));
        assert_eq!(cfg.bot.boost_prefix, "!boost");
    }
}
