//! 缓存存储接口
//!
//! 编排器只依赖该 trait，具体后端可以是进程内存或 Redis。
//! 存储中的值是完整序列化后的结果，要么整体存在，要么不存在。

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FetchError, Result};

/// 带 TTL 的键值存储
///
/// 按前缀删除和整体清空是可选能力：无法枚举键的后端保留默认实现，
/// 返回 `FetchError::Unsupported`，由调用方决定如何降级。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 后端名称，用于日志和指标
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// 删除单个键，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 删除所有以 `prefix` 开头的键，返回删除数量
    async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
        Err(FetchError::Unsupported {
            operation: "delete_prefix",
        })
    }

    /// 清空整个存储
    async fn clear(&self) -> Result<()> {
        Err(FetchError::Unsupported { operation: "clear" })
    }
}
