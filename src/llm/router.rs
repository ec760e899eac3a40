//! 模型路由：按消息文本选择模型
//!
//! 有序表 (模型 ID, 判定函数)，首个命中者胜出；无命中则不响应（不是错误）。
//! 默认表：显式前缀命令（如 `!boost`）触发增强模型，优先于「提到助手名字」触发的默认模型。

use std::fmt;
use std::sync::Arc;

/// 判定函数：输入原始消息文本
pub type EngagePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// 路由表中的一条规则
#[derive(Clone)]
pub struct RouteRule {
    pub model: String,
    pub predicate: EngagePredicate,
}

impl fmt::Debug for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRule").field("model", &self.model).finish()
    }
}

/// 模型路由器
#[derive(Debug, Clone, Default)]
pub struct ModelRouter {
    rules: Vec<RouteRule>,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条规则（越早加入优先级越高）
    pub fn route(
        mut self,
        model: impl Into<String>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(RouteRule {
            model: model.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    /// 默认路由：增强模型（前缀命令）→ 默认模型（提到名字）
    pub fn with_defaults(
        default_model: &str,
        boosted_model: Option<&str>,
        boost_prefix: &str,
        names: &[String],
    ) -> Self {
        let mut router = Self::new();
        if let Some(boosted) = boosted_model.filter(|m| !m.is_empty()) {
            let prefix = boost_prefix.to_string();
            router = router.route(boosted, move |text| has_command_prefix(text, &prefix));
        }
        let names = names.to_vec();
        router.route(default_model, move |text| mentions_name(text, &names))
    }

    /// 首个命中的模型 ID
    pub fn select(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| (r.predicate)(text))
            .map(|r| r.model.as_str())
    }

    pub fn models(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.model.as_str()).collect()
    }
}

/// 大小写不敏感地检查文本是否包含任一名字（含全角写法，如 AI / ＡＩ）
pub fn mentions_name(text: &str, names: &[String]) -> bool {
    let upper = text.to_uppercase();
    names
        .iter()
        .filter(|n| !n.is_empty())
        .any(|n| upper.contains(&n.to_uppercase()))
}

/// 文本（去掉前导空白后）是否以命令前缀开头，前缀后须为空白或结尾
pub fn has_command_prefix(text: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    let text = text.trim_start();
    let Some(head) = text.get(..prefix.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(prefix) {
        return false;
    }
    text[prefix.len()..]
        .chars()
        .next()
        .map_or(true, char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["AI".to_string(), "ＡＩ".to_string()]
    }

    #[test]
    fn test_name_mention_engages_default_model() {
        let router = ModelRouter::with_defaults("gpt-4.1-mini", None, "!boost", &names());
        assert_eq!(router.select("hey AI how are you"), Some("gpt-4.1-mini"));
        assert_eq!(router.select("ai, what's up"), Some("gpt-4.1-mini"));
        assert_eq!(router.select("ＡＩさん元気？"), Some("gpt-4.1-mini"));
        assert_eq!(router.select("ａｉさん"), Some("gpt-4.1-mini"));
        assert_eq!(router.select("hello there"), None);
    }

    #[test]
    fn test_boost_prefix_takes_precedence() {
        let router =
            ModelRouter::with_defaults("gpt-4.1-mini", Some("gpt-4.1"), "!boost", &names());
        assert_eq!(router.select("!boost AI explain monads"), Some("gpt-4.1"));
        assert_eq!(router.select("!boost explain monads"), Some("gpt-4.1"));
        assert_eq!(router.select("!boosted AI"), Some("gpt-4.1-mini"));
        assert_eq!(router.models(), vec!["gpt-4.1", "gpt-4.1-mini"]);
    }

    #[test]
    fn test_custom_table_first_match() {
        let router = ModelRouter::new()
            .route("a", |t| t.contains('x'))
            .route("b", |t| t.contains('x') || t.contains('y'));
        assert_eq!(router.select("xy"), Some("a"));
        assert_eq!(router.select("y"), Some("b"));
        assert_eq!(router.select("z"), None);
    }

    #[test]
    fn test_has_command_prefix_non_ascii_text() {
        assert!(!has_command_prefix("あ", "!boost"));
        assert!(has_command_prefix("  !BOOST", "!boost"));
    }
}
