//! 成员昵称缓存：participant id -> 昵称
//!
//! 尽力而为：只缓存拿到的昵称，缺失的下次再查；缓存缺失永远不影响正确性。

use std::collections::HashMap;
use std::future::Future;

#[derive(Debug, Clone, Default)]
pub struct NickCache {
    nicks: HashMap<String, String>,
}

impl NickCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.nicks.get(id).map(String::as_str)
    }

    /// 写入昵称；None 或空字符串会清除旧值
    pub fn set(&mut self, id: impl Into<String>, nick: Option<String>) {
        let id = id.into();
        match nick.filter(|n| !n.is_empty()) {
            Some(n) => {
                self.nicks.insert(id, n);
            }
            None => {
                self.nicks.remove(&id);
            }
        }
    }

    /// 命中则直接返回，否则调用 fetcher；只有 Some 结果会被缓存
    pub async fn get_or_fetch<F, Fut>(&mut self, id: &str, fetcher: F) -> Option<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        if let Some(nick) = self.nicks.get(id) {
            return Some(nick.clone());
        }
        let nick = fetcher(id.to_string()).await.filter(|n| !n.is_empty())?;
        self.nicks.insert(id.to_string(), nick.clone());
        Some(nick)
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.nicks
    }

    pub fn len(&self) -> usize {
        self.nicks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nicks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_fetch_caches_only_present_values() {
        let mut cache = NickCache::new();
        assert_eq!(cache.get_or_fetch("1", |_| async { None }).await, None);
        assert!(cache.is_empty());

        let got = cache
            .get_or_fetch("1", |id| async move { Some(format!("nick-{}", id)) })
            .await;
        assert_eq!(got.as_deref(), Some("nick-1"));
        // 第二次命中缓存，fetcher 的结果被忽略
        let got = cache
            .get_or_fetch("1", |_| async { Some("other".to_string()) })
            .await;
        assert_eq!(got.as_deref(), Some("nick-1"));
    }

    #[test]
    fn test_set_none_clears() {
        let mut cache = NickCache::new();
        cache.set("1", Some("Bobby".into()));
        assert_eq!(cache.get("1"), Some("Bobby"));
        cache.set("1", None);
        assert_eq!(cache.get("1"), None);
    }
}
