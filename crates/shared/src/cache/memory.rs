//! 内存存储
//!
//! 使用 DashMap 实现的进程内 TTL 存储，适用于单实例部署和测试环境。
//! 过期条目在读取时惰性剔除，也可通过 `purge_expired` 主动清理。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::store::CacheStore;
use crate::error::Result;

/// TTL 超出时钟可表示范围时使用的过期时长（约 100 年）
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// 计算过期时刻，溢出时退化为远期时刻
fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 进程内缓存存储
///
/// 基于 DashMap 实现，支持高并发读写。时间取自 tokio 时钟，
/// 在暂停时钟的测试中可确定性地推进 TTL。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前条目数（包含尚未剔除的过期条目）
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 剔除所有已过期条目，返回剔除数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.data.len())
    }

    /// 绕过编排器直接写入原始值，仅用于构造测试场景（如损坏的条目）
    pub fn insert_raw(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        self.data.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: deadline(ttl),
            },
        );
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // 读锁已释放后再删除，避免 DashMap 分片死锁
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.data.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let before = self.data.len();
        self.data.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.data.len()) as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set("k", "v".to_string(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(store.get("k").await.unwrap().is_none());
        // 惰性剔除后条目已被移除
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.insert_raw("short", "1", Duration::from_secs(1));
        store.insert_raw("long", "2", Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = MemoryStore::new();
        store
            .set("k", "v".to_string(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        store.insert_raw("raw", "v", Duration::MAX);

        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("raw").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_delete_prefix_and_clear() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.insert_raw("geocode:fwd:a", "1", ttl);
        store.insert_raw("geocode:rev:b", "2", ttl);
        store.insert_raw("weather:current:c", "3", ttl);

        assert_eq!(store.delete_prefix("geocode:").await.unwrap(), 2);
        assert_eq!(store.len(), 1);

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
