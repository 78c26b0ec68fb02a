//! 缓存模块
//!
//! - [`CacheStore`]：带 TTL 的键值存储接口，提供内存与 Redis 两种实现
//! - [`CacheKey`]：缓存键构建
//! - [`CacheOrchestrator`]：单飞 cache-aside 编排器，所有缓存写入的唯一入口

pub mod key;
pub mod memory;
pub mod orchestrator;
pub mod redis_store;
pub mod store;

use std::sync::Arc;

use tracing::info;

pub use key::{CacheKey, CacheKeyBuilder};
pub use memory::MemoryStore;
pub use orchestrator::{CacheOrchestrator, InvalidateOutcome};
pub use redis_store::RedisStore;
pub use store::CacheStore;

use crate::config::{AppConfig, CacheBackend};
use crate::error::Result;

/// 按配置创建缓存存储
pub fn build_store(config: &AppConfig) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::Redis => Arc::new(RedisStore::new(&config.redis)?),
    };
    info!(backend = store.name(), "Cache store created");
    Ok(store)
}

/// 按配置创建编排器
pub fn build_orchestrator(config: &AppConfig) -> Result<CacheOrchestrator> {
    let store = build_store(config)?;
    Ok(CacheOrchestrator::new(store, config.cache.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_memory_orchestrator() {
        let orchestrator = build_orchestrator(&AppConfig::default()).unwrap();
        assert_eq!(orchestrator.in_flight_count(), 0);
        assert_eq!(orchestrator.default_ttl().as_secs(), 3600);
    }
}
