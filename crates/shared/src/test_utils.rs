//! 测试工具模块
//!
//! 提供单元测试和集成测试共用的探针与可注入故障的存储实现。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheOrchestrator, CacheStore, MemoryStore};
use crate::config::CacheConfig;
use crate::error::{FetchError, Result};

// ==================== 调用计数 ====================

/// 计算函数调用计数器
///
/// 克隆后共享同一个计数，便于在 `move` 闭包中使用。
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicU32>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次调用，返回本次是第几次（从 1 开始）
    pub fn hit(&self) -> u32 {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

// ==================== 并发探针 ====================

/// 记录同时进行中的操作数及其峰值
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// 离开作用域时递减当前并发数
pub struct ProbeSlot {
    current: Arc<AtomicUsize>,
}

impl Drop for ProbeSlot {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入一个并发槽位
    pub fn enter(&self) -> ProbeSlot {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeSlot {
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// 观测到的最大并发数
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// ==================== 故障注入存储 ====================

/// 可按需让读写失败的内存存储
///
/// 用于验证存储不可用时编排器降级为直接计算。
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 成功写入的次数
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// 底层内存存储
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    fn unavailable() -> FetchError {
        FetchError::Store("injected store outage".to_string())
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete(key).await
    }
}

// ==================== 编排器构造 ====================

/// 基于内存存储的编排器，返回存储句柄以便断言
pub fn memory_orchestrator() -> (CacheOrchestrator, MemoryStore) {
    let store = MemoryStore::new();
    let orchestrator = CacheOrchestrator::new(Arc::new(store.clone()), CacheConfig::default());
    (orchestrator, store)
}

/// 基于故障注入存储的编排器
pub fn flaky_orchestrator() -> (CacheOrchestrator, FlakyStore) {
    let store = FlakyStore::new();
    let orchestrator = CacheOrchestrator::new(Arc::new(store.clone()), CacheConfig::default());
    (orchestrator, store)
}
