//! 长期记忆持久化
//!
//! 每个群（group id）一段文本，条目以换行分隔，无 schema 版本。
//! SqliteMemoryStore：rusqlite 同步连接，放在 spawn_blocking 中执行；写入为单键 upsert。
//! InMemoryStore：测试与 `store.backend = "memory"` 使用。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::core::{BotError, BotResult};

/// 记忆存储接口
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 读取群的记忆文本；不存在时返回 None
    async fn read(&self, group_id: &str) -> BotResult<Option<String>>;

    /// 写入（插入或覆盖）群的记忆文本
    async fn write(&self, group_id: &str, blob: &str) -> BotResult<()>;
}

/// SQLite 记忆存储：表 chat_memory(guild_id PRIMARY KEY, memory)
#[derive(Clone)]
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMemoryStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteMemoryStore {
    /// 打开（或创建）数据库并执行迁移；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> BotResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        }
        let conn = Connection::open(&path)?;
        Self::run_migrations(&conn)?;
        tracing::info!(path = %path.display(), "Memory store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_memory (
                guild_id TEXT PRIMARY KEY,
                memory TEXT
            );",
        )
    }

    async fn with_conn<T, F>(&self, f: F) -> BotResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BotError::StoreUnavailable("connection lock poisoned".to_string()))?;
            f(&guard).map_err(BotError::from)
        })
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn read(&self, group_id: &str) -> BotResult<Option<String>> {
        let group_id = group_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT memory FROM chat_memory WHERE guild_id = ?1",
                params![group_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
        .await
    }

    async fn write(&self, group_id: &str, blob: &str) -> BotResult<()> {
        let group_id = group_id.to_string();
        let blob = blob.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_memory (guild_id, memory) VALUES (?1, ?2)
                 ON CONFLICT(guild_id) DO UPDATE SET memory = excluded.memory",
                params![group_id, blob],
            )
            .map(|_| ())
        })
        .await
    }
}

/// 内存存储：记录写入次数；可切换为「不可用」以模拟存储故障
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blobs: RwLock<HashMap<String, String>>,
    writes: AtomicUsize,
    unavailable: std::sync::atomic::AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> BotResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BotError::StoreUnavailable("store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn read(&self, group_id: &str) -> BotResult<Option<String>> {
        self.check()?;
        Ok(self.blobs.read().await.get(group_id).cloned())
    }

    async fn write(&self, group_id: &str, blob: &str) -> BotResult<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .write()
            .await
            .insert(group_id.to_string(), blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEdit, MemoryLedger};

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMemoryStore::open(dir.path().join("db.sqlite")).unwrap();

        assert_eq!(store.read("g1").await.unwrap(), None);

        let mut ledger = MemoryLedger::default();
        ledger.apply_batch(&[
            MemoryEdit::Add("alice likes tea".into()),
            MemoryEdit::Add("bob has a cat".into()),
        ]);
        store.write("g1", &ledger.to_blob()).await.unwrap();

        let blob = store.read("g1").await.unwrap().unwrap();
        assert_eq!(blob, "alice likes tea\nbob has a cat");
        assert_eq!(MemoryLedger::from_blob(&blob), ledger);
        assert_eq!(store.read("g2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_upsert_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        let store = SqliteMemoryStore::open(&path).unwrap();
        store.write("g1", "first").await.unwrap();
        store.write("g1", "second").await.unwrap();
        assert_eq!(store.read("g1").await.unwrap().as_deref(), Some("second"));

        // 重新打开后数据仍在
        drop(store);
        let reopened = SqliteMemoryStore::open(&path).unwrap();
        assert_eq!(reopened.read("g1").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_in_memory_store_counts_writes_and_fails_on_demand() {
        let store = InMemoryStore::new();
        store.write("g", "x").await.unwrap();
        assert_eq!(store.write_count(), 1);
        store.set_unavailable(true);
        assert!(matches!(store.read("g").await, Err(BotError::StoreUnavailable(_))));
        assert!(store.write("g", "y").await.is_err());
        assert_eq!(store.write_count(), 1);
    }
}
