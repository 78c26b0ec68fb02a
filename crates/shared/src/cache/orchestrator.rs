//! 单飞缓存编排器
//!
//! 提供 cache-aside 的 "读取或计算并缓存" 原语：
//!
//! 1. 先读缓存存储，命中且可反序列化时直接返回，不调用计算函数；
//! 2. 未命中（或条目损坏、存储不可用）时检查进行中的计算表，
//!    同一个键已有计算时，新的调用方直接等待同一个结果；
//! 3. 否则登记一个新计算并在 tokio 运行时上执行，成功后按 TTL 写回存储；
//! 4. 计算结束（成功或失败）时无条件移除登记，失败结果不会被缓存或重放。
//!
//! 缓存只是优化手段而非正确性依赖：存储的读写失败只记录日志，降级为直接计算。
//! 所有写入都经由编排器完成，外部组件不应直接写存储。
//!
//! 损坏条目的删除与同一个键的写回之间没有互斥：读到损坏条目后，若另一个计算恰好
//! 先完成写回，随后的删除会把新值一并删掉。后果只是下一次读取多一次未命中。

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::key::CacheKey;
use super::store::CacheStore;
use crate::config::CacheConfig;
use crate::error::{FetchError, Result};
use crate::observability::tracing::current_trace_id;

type SharedValue = Arc<dyn Any + Send + Sync>;
type Computation = Shared<BoxFuture<'static, Result<SharedValue>>>;

/// 进行中的计算登记
///
/// `id` 区分同一个键先后发起的不同计算，旧计算的清理不会误删新登记。
struct InFlight {
    id: u64,
    computation: Computation,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    next_id: AtomicU64,
}

impl Inner {
    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

/// 计算结束或被丢弃时移除对应登记
struct RegistrationGuard {
    inner: Arc<Inner>,
    key: CacheKey,
    id: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            in_flight.remove(&self.key);
        }
        metrics::gauge!("cache_in_flight").set(in_flight.len() as f64);
    }
}

/// 失效操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateOutcome {
    /// 删除了若干条目
    Deleted(u64),
    /// 存储后端无法按前缀枚举键，未执行任何删除
    Unsupported,
    /// 存储不可用，删除未完成
    Failed,
}

/// 单飞 cache-aside 编排器
///
/// 显式构造并通过克隆共享（内部为 `Arc`），持有自己的存储句柄和进行中计算表，
/// 不依赖任何全局状态。
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("store", &self.inner.store.name())
            .field("key_prefix", &self.inner.config.key_prefix)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl CacheOrchestrator {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// 配置中的默认 TTL
    pub fn default_ttl(&self) -> Duration {
        self.inner.config.default_ttl()
    }

    /// 当前进行中的计算数量
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// 读取缓存，未命中时计算并写回
    ///
    /// 对同一个键的并发调用只会执行一次 `compute`，所有调用方得到同一个值或同一个错误。
    /// `compute` 返回的错误原样传递给所有等待者，且不会写入缓存。
    ///
    /// 计算在独立任务中执行：发起登记的调用方被取消后，计算仍会完成并写入缓存，
    /// 其他等待者不受影响。
    ///
    /// # Errors
    ///
    /// - `ttl` 为零时返回 `InvalidArgument`，不执行计算
    /// - `compute` 失败时返回其错误
    /// - `compute` panic 时返回 `Internal`
    #[instrument(skip(self, compute), fields(key = %key, ttl_ms = ttl.as_millis() as u64))]
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if ttl.is_zero() {
            return Err(FetchError::invalid_argument("ttl", "TTL 必须大于 0"));
        }

        if let Some(value) = self.lookup::<T>(key).await {
            return Ok(value);
        }

        let computation = self.join_or_start(key, ttl, compute);
        let shared = computation.await?;

        shared
            .downcast::<T>()
            .map(Arc::unwrap_or_clone)
            .map_err(|_| {
                FetchError::Internal(format!("缓存键 {key} 的并发计算返回了不同类型的值"))
            })
    }

    /// 读取并反序列化缓存条目
    ///
    /// 存储错误和损坏的条目都按未命中处理。
    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let store_key = self.inner.store_key(key.as_str());

        let raw = match self.inner.store.get(&store_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::counter!("cache_requests_total", "result" => "miss").increment(1);
                return None;
            }
            Err(e) => {
                metrics::counter!("cache_store_errors_total", "op" => "get").increment(1);
                warn!(
                    key = %key,
                    store = self.inner.store.name(),
                    error = %e,
                    trace_id = ?current_trace_id(),
                    "缓存读取失败，降级为直接计算"
                );
                return None;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                metrics::counter!("cache_requests_total", "result" => "hit").increment(1);
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                metrics::counter!("cache_requests_total", "result" => "corrupt").increment(1);
                warn!(
                    key = %key,
                    error = %e,
                    trace_id = ?current_trace_id(),
                    "缓存条目无法反序列化，按未命中处理"
                );
                if self.inner.config.evict_corrupt_entries {
                    if let Err(e) = self.inner.store.delete(&store_key).await {
                        warn!(key = %key, error = %e, "删除损坏的缓存条目失败");
                    }
                }
                None
            }
        }
    }

    /// 加入已有计算，或原子地登记并启动一个新计算
    fn join_or_start<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Computation
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            metrics::counter!("cache_requests_total", "result" => "coalesced").increment(1);
            debug!(key = %key, "并发请求已合并到进行中的计算");
            return existing.computation.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel::<Result<SharedValue>>();
        let computation = receiver
            .map(|received| {
                received.unwrap_or_else(|_| Err(FetchError::Internal("缓存计算异常中止".to_string())))
            })
            .boxed()
            .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                computation: computation.clone(),
            },
        );
        metrics::gauge!("cache_in_flight").set(in_flight.len() as f64);
        drop(in_flight);

        let guard = RegistrationGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            id,
        };
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let future = compute();

        let task = async move {
            let started = Instant::now();
            let result = future.await;
            metrics::histogram!("cache_compute_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            let result = match result {
                Ok(value) => {
                    write_back(&inner, &key, &value, ttl).await;
                    Ok(Arc::new(value) as SharedValue)
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "缓存计算失败，不写入缓存");
                    Err(e)
                }
            };

            // 先移除登记再通知等待者：此后到达的调用方要么命中缓存，要么发起新计算
            drop(guard);
            let _ = sender.send(result);
        };

        // panic 时 sender 被丢弃，所有等待者收到 Internal 错误；guard 在展开时移除登记
        tokio::spawn(task);

        computation
    }

    /// 删除单个缓存条目
    #[instrument(skip(self), fields(key = %key))]
    pub async fn invalidate(&self, key: &CacheKey) -> InvalidateOutcome {
        let store_key = self.inner.store_key(key.as_str());
        match self.inner.store.delete(&store_key).await {
            Ok(existed) => InvalidateOutcome::Deleted(u64::from(existed)),
            Err(e) => {
                metrics::counter!("cache_store_errors_total", "op" => "delete").increment(1);
                warn!(key = %key, error = %e, "删除缓存条目失败");
                InvalidateOutcome::Failed
            }
        }
    }

    /// 按前缀删除缓存条目（尽力而为）
    ///
    /// 已知限制：无法按模式枚举键的存储后端不支持该操作，此时记录告警并返回
    /// `InvalidateOutcome::Unsupported`，调用方应改为精确失效或 `clear_all`。
    #[instrument(skip(self))]
    pub async fn invalidate_prefix(&self, prefix: &str) -> InvalidateOutcome {
        let store_prefix = self.inner.store_key(prefix);
        match self.inner.store.delete_prefix(&store_prefix).await {
            Ok(count) => {
                debug!(prefix, count, "按前缀删除缓存条目");
                InvalidateOutcome::Deleted(count)
            }
            Err(FetchError::Unsupported { .. }) => {
                warn!(
                    prefix,
                    store = self.inner.store.name(),
                    "存储后端不支持按前缀删除，缓存条目将在 TTL 到期后失效"
                );
                InvalidateOutcome::Unsupported
            }
            Err(e) => {
                metrics::counter!("cache_store_errors_total", "op" => "delete_prefix").increment(1);
                warn!(prefix, error = %e, "按前缀删除缓存条目失败");
                InvalidateOutcome::Failed
            }
        }
    }

    /// 按键或 `prefix*` 形式的模式失效
    pub async fn invalidate_pattern(&self, key_or_prefix: &str) -> InvalidateOutcome {
        match key_or_prefix.strip_suffix('*') {
            Some(prefix) => self.invalidate_prefix(prefix).await,
            None => self.invalidate(&CacheKey::from_raw(key_or_prefix)).await,
        }
    }

    /// 清空整个缓存存储（尽力而为）
    ///
    /// 后端不支持整体清空时记录告警并返回 `false`。
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> bool {
        match self.inner.store.clear().await {
            Ok(()) => {
                debug!(store = self.inner.store.name(), "缓存已清空");
                true
            }
            Err(FetchError::Unsupported { .. }) => {
                warn!(store = self.inner.store.name(), "存储后端不支持整体清空，忽略该操作");
                false
            }
            Err(e) => {
                metrics::counter!("cache_store_errors_total", "op" => "clear").increment(1);
                warn!(error = %e, "清空缓存失败");
                false
            }
        }
    }
}

/// 序列化并写回存储，失败只记录日志
async fn write_back<T: Serialize>(inner: &Inner, key: &CacheKey, value: &T, ttl: Duration) {
    let serialized = match serde_json::to_string(value) {
        Ok(serialized) => serialized,
        Err(e) => {
            warn!(key = %key, error = %e, "缓存值序列化失败，跳过写入");
            return;
        }
    };

    if let Err(e) = inner
        .store
        .set(&inner.store_key(key.as_str()), serialized, ttl)
        .await
    {
        metrics::counter!("cache_store_errors_total", "op" => "set").increment(1);
        warn!(
            key = %key,
            store = inner.store.name(),
            error = %e,
            trace_id = ?current_trace_id(),
            "缓存写入失败，结果仍返回给调用方"
        );
    }
}
