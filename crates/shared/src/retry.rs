//! 重试策略与执行器
//!
//! 对远程调用的失败进行分类：资源不存在和未授权立即返回，限流和瞬时网络故障
//! 按线性（或指数）退避重试，直到达到尝试上限后返回可区分的 `RetriesExhausted`。
//! 每次调用可附带超时，超时按瞬时网络故障处理。

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{ErrorClass, FetchError, Result};
use crate::observability::tracing::current_trace_id;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 退避方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// 第 N 次重试前等待 N * base_delay
    Linear,
    /// 第 N 次重试前等待 base_delay * multiplier^(N-1)
    Exponential { multiplier: f64 },
}

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（包含首次执行）
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// 单次调用超时
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 3 次，线性退避 1 秒步长，单次调用 10 秒超时
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Linear,
            attempt_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后（从 1 开始）的等待时间，不超过 max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential { multiplier } => {
                let base_ms = self.base_delay.as_millis() as f64;
                let delay_ms = base_ms * multiplier.powi(attempt as i32 - 1);
                Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
            }
        };
        delay.min(self.max_delay)
    }

    /// 结合上游返回的建议等待时间计算实际退避
    fn backoff_for(&self, attempt: u32, err: &FetchError) -> Duration {
        let computed = self.delay_for_attempt(attempt);
        match err.retry_after() {
            Some(hint) => hint.max(computed).min(self.max_delay),
            None => computed,
        }
    }

    /// 已失败 `attempt` 次后是否还能继续尝试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// retry_classified — 带分类重试的异步执行器
// ---------------------------------------------------------------------------

/// 使用 `FetchError::class` 作为分类函数的重试执行器
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_classified(policy, operation_name, FetchError::class, operation).await
}

/// 带分类的异步重试执行器
///
/// - `NotFound` / `Unauthorized`：立即返回原始错误
/// - `RateLimited` / `TransientNetwork`：尚有尝试次数时退避后重试，
///   用尽后返回包装最后一次错误的 `RetriesExhausted`
/// - `Terminal`：立即返回原始错误
pub async fn retry_classified<F, Fut, T, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    classify: C,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&FetchError) -> ErrorClass,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let started = Instant::now();

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    operation: operation_name.to_string(),
                    elapsed: started.elapsed(),
                }),
            },
            None => operation().await,
        };

        let err = match outcome {
            Ok(value) => {
                record_attempt(operation_name, "success");
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let class = classify(&err);
        if !class.is_retryable() {
            record_attempt(operation_name, class.as_str());
            warn!(
                operation = operation_name,
                attempt,
                class = %class,
                error = %err,
                trace_id = ?current_trace_id(),
                "操作失败且不可重试，直接返回错误"
            );
            return Err(err);
        }

        if !policy.should_retry(attempt) {
            record_attempt(operation_name, "exhausted");
            warn!(
                operation = operation_name,
                attempts = attempt,
                class = %class,
                error = %err,
                trace_id = ?current_trace_id(),
                "已达最大尝试次数，放弃重试"
            );
            return Err(FetchError::RetriesExhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        record_attempt(operation_name, class.as_str());
        let delay = policy.backoff_for(attempt, &err);
        warn!(
            operation = operation_name,
            attempt,
            class = %class,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，将在退避后重试"
        );
        metrics::histogram!("retry_backoff_seconds", "operation" => operation_name.to_string())
            .record(delay.as_secs_f64());

        tokio::time::sleep(delay).await;
        debug!(operation = operation_name, attempt, "退避结束，开始下一次尝试");
    }
}

fn record_attempt(operation: &str, outcome: &'static str) {
    metrics::counter!(
        "retry_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff: Backoff::Linear,
            attempt_timeout: None,
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff, Backoff::Linear);
    }

    #[test]
    fn test_delay_for_attempt_linear_backoff() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
        // 超过上限后被截断
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_for_attempt_exponential_backoff() {
        let policy = RetryPolicy {
            backoff: Backoff::Exponential { multiplier: 2.0 },
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_hint_extends_backoff() {
        let policy = RetryPolicy::default();
        let err = FetchError::RateLimited {
            service: "geocoding".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.backoff_for(1, &err), Duration::from_secs(7));

        let err = FetchError::RateLimited {
            service: "geocoding".to_string(),
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(policy.backoff_for(1, &err), policy.max_delay);
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(&fast_policy(3), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(&fast_policy(3), "test_op", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(FetchError::Network("connection reset".to_string()))
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<i32> = retry(&fast_policy(3), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Network("still down".to_string()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(FetchError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Network(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<i32> = retry(&fast_policy(5), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::not_found("place"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(FetchError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_unauthorized_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<i32> = retry(&fast_policy(5), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Unauthorized {
                    service: "weather".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(FetchError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_custom_classifier_overrides_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // 将所有错误视为限流
        let result: Result<i32> = retry_classified(
            &fast_policy(2),
            "test_op",
            |_| ErrorClass::RateLimited,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::invalid_argument("q", "empty"))
                }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(FetchError::RetriesExhausted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = fast_policy(2).with_attempt_timeout(Some(Duration::from_millis(50)));

        let result = retry(&policy, "slow_op", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, FetchError>("fresh")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_waits_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff: Backoff::Linear,
            attempt_timeout: None,
        };
        let start = tokio::time::Instant::now();

        let result: Result<()> = retry(&policy, "test_op", || async {
            Err(FetchError::Network("down".to_string()))
        })
        .await;

        assert!(result.is_err());
        // 100ms + 200ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "elapsed: {elapsed:?}");
    }
}
