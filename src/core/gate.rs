//! 并发闸门：按频道串行化对会话上下文的访问
//!
//! 每个 key 一个 tokio Mutex（FIFO 公平）：同一频道的后续调用排队等待，不同频道互不阻塞。
//! 映射表锁只在查找/插入槽位时短暂持有，永远不跨 await。
//! 槽位数超过上限时，按最近使用时间淘汰空闲槽位（LRU）；被淘汰的上下文下次访问时重新加载。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::core::BotResult;

type Slot<T> = Arc<tokio::sync::Mutex<Option<T>>>;

struct SlotEntry<T> {
    slot: Slot<T>,
    last_used: u64,
}

/// 按 key 互斥的上下文注册表
pub struct ContextGate<T> {
    slots: Mutex<HashMap<String, SlotEntry<T>>>,
    max_slots: usize,
    clock: AtomicU64,
}

impl<T: Send> std::fmt::Debug for ContextGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGate")
            .field("len", &self.len())
            .field("max_slots", &self.max_slots)
            .finish()
    }
}

impl<T: Send> ContextGate<T> {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_slots: max_slots.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// 独占访问 key 对应的上下文：首次访问时用 init 创建，运行 f 直至完成后释放。
    /// init 失败时槽位保持为空，下次调用重试。
    pub async fn with_context<I, IFut, F, R>(&self, key: &str, init: I, f: F) -> BotResult<R>
    where
        I: FnOnce() -> IFut,
        IFut: Future<Output = BotResult<T>>,
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, R>,
    {
        let slot = self.slot_for(key);
        let mut guard = slot.lock().await;
        let ctx = match guard.take() {
            Some(ctx) => ctx,
            None => {
                let ctx = init().await?;
                tracing::debug!(key, "Context created");
                ctx
            }
        };
        let ctx = guard.insert(ctx);
        Ok(f(ctx).await)
    }

    /// 当前槽位数（含排队中的 key）
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_slots().contains_key(key)
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, SlotEntry<T>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot_for(&self, key: &str) -> Slot<T> {
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.lock_slots();
        if let Some(entry) = slots.get_mut(key) {
            entry.last_used = now;
            return Arc::clone(&entry.slot);
        }

        let slot: Slot<T> = Arc::new(tokio::sync::Mutex::new(None));
        slots.insert(
            key.to_string(),
            SlotEntry {
                slot: Arc::clone(&slot),
                last_used: now,
            },
        );
        Self::evict_idle(&mut slots, self.max_slots, key);
        slot
    }

    /// 只淘汰空闲槽位（除映射表外无人持有）；全部忙碌时允许暂时超出上限
    fn evict_idle(slots: &mut HashMap<String, SlotEntry<T>>, max_slots: usize, keep: &str) {
        while slots.len() > max_slots {
            let victim = slots
                .iter()
                .filter(|(k, e)| k.as_str() != keep && Arc::strong_count(&e.slot) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    slots.remove(&k);
                    tracing::debug!(key = %k, "Evicted idle context");
                }
                None => break,
            }
        }
    }
}
