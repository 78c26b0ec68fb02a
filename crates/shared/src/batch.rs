//! 有界并发批量执行
//!
//! 将请求列表按位置切分为不超过 `concurrency_limit` 的分组，组内并发执行、
//! 等待全部结束后再开始下一组，组间插入固定间隔以避免对上游形成突发流量。
//!
//! 单个请求的失败（包括 panic）不会取消或阻塞同组的其他请求；
//! 执行器本身不做重试，重试由各请求内部的计算函数负责。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::{debug, info, instrument, warn};

use crate::config::BatchConfig;
use crate::error::{FetchError, Result};

/// 批量执行中的单个请求
pub struct FetchRequest<T> {
    pub id: String,
    compute: BoxFuture<'static, Result<T>>,
}

impl<T> FetchRequest<T> {
    pub fn new<Fut>(id: impl Into<String>, compute: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            compute: Box::pin(compute),
        }
    }
}

impl<T> std::fmt::Debug for FetchRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRequest").field("id", &self.id).finish()
    }
}

/// 单个请求的执行结果
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub id: String,
    /// 请求在输入列表中的位置
    pub index: usize,
    pub result: Result<T>,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// 批量执行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T> From<&[Outcome<T>]> for BatchSummary {
    fn from(outcomes: &[Outcome<T>]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

/// 按分组并发执行请求，返回与输入顺序一致的逐项结果
///
/// `concurrency_limit` 为 0 时按 1 处理。间隔只插入在分组之间，最后一组之后不等待。
#[instrument(skip(requests), fields(total = requests.len()))]
pub async fn run_batched<T>(
    requests: Vec<FetchRequest<T>>,
    concurrency_limit: usize,
    inter_batch_delay: Duration,
) -> Vec<Outcome<T>> {
    let total = requests.len();
    let limit = concurrency_limit.max(1);
    let group_count = total.div_ceil(limit);
    let mut outcomes = Vec::with_capacity(total);

    let mut pending = requests.into_iter().enumerate().peekable();
    let mut group_idx = 0;

    while pending.peek().is_some() {
        if group_idx > 0 && !inter_batch_delay.is_zero() {
            debug!(
                group = group_idx,
                delay_ms = inter_batch_delay.as_millis() as u64,
                "分组间等待"
            );
            tokio::time::sleep(inter_batch_delay).await;
        }

        // 组内并发执行，等待全部结束（无论成功或失败）
        let group = pending.by_ref().take(limit).map(|(index, request)| {
            let FetchRequest { id, compute } = request;
            async move {
                let result = match AssertUnwindSafe(compute).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(id = %id, "批量请求执行时 panic");
                        Err(FetchError::Internal(format!("批量请求 {id} 执行时 panic")))
                    }
                };
                Outcome { id, index, result }
            }
        });
        let results = join_all(group).await;

        for outcome in &results {
            let label = if outcome.is_success() { "success" } else { "failure" };
            metrics::counter!("batch_items_total", "outcome" => label).increment(1);
            if let Err(e) = &outcome.result {
                debug!(id = %outcome.id, index = outcome.index, error = %e, "批量请求失败");
            }
        }
        metrics::counter!("batch_groups_total").increment(1);

        outcomes.extend(results);
        group_idx += 1;
    }

    let summary = BatchSummary::from(outcomes.as_slice());
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        groups = group_count,
        "批量执行完成"
    );

    outcomes
}

/// 持有批量配置的执行器
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.config.concurrency_limit.max(1)
    }

    pub async fn run<T>(&self, requests: Vec<FetchRequest<T>>) -> Vec<Outcome<T>> {
        run_batched(
            requests,
            self.config.concurrency_limit,
            self.config.inter_batch_delay(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ConcurrencyProbe;

    fn ok_request(id: usize) -> FetchRequest<usize> {
        FetchRequest::new(format!("req-{id}"), async move { Ok(id) })
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let requests = (0..7)
            .map(|i| {
                FetchRequest::new(format!("req-{i}"), async move {
                    // 后面的请求先完成
                    tokio::time::sleep(Duration::from_millis(10 - i as u64)).await;
                    Ok(i)
                })
            })
            .collect();

        let outcomes = run_batched(requests, 3, Duration::ZERO).await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, (0..7).collect::<Vec<_>>());
        assert!(outcomes.iter().all(|o| o.result.as_ref().unwrap() == &o.index));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let requests = (1..=5)
            .map(|i| {
                FetchRequest::new(format!("req-{i}"), async move {
                    if i == 3 {
                        Err(FetchError::not_found("req-3"))
                    } else {
                        Ok(i)
                    }
                })
            })
            .collect();

        let outcomes = run_batched(requests, 2, Duration::ZERO).await;
        let summary = BatchSummary::from(outcomes.as_slice());

        assert_eq!(summary, BatchSummary { total: 5, succeeded: 4, failed: 1 });
        assert!(!outcomes[2].is_success());
        assert_eq!(outcomes[2].id, "req-3");
    }

    #[tokio::test]
    async fn test_panicking_item_is_isolated() {
        let requests = vec![
            ok_request(0),
            FetchRequest::new("boom", async {
                if true {
                    panic!("item exploded");
                }
                Ok(1)
            }),
            ok_request(2),
        ];

        let outcomes = run_batched(requests, 3, Duration::ZERO).await;

        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1].result, Err(FetchError::Internal(_))));
        assert!(outcomes[2].is_success());
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let probe = ConcurrencyProbe::new();
        let requests = (0..10)
            .map(|i| {
                let probe = probe.clone();
                FetchRequest::new(format!("req-{i}"), async move {
                    let _slot = probe.enter();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(i)
                })
            })
            .collect();

        let outcomes = run_batched(requests, 3, Duration::ZERO).await;

        assert_eq!(outcomes.len(), 10);
        assert_eq!(probe.peak(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_groups() {
        let requests = (0..5).map(ok_request).collect();
        let start = tokio::time::Instant::now();

        run_batched(requests, 2, Duration::from_millis(100)).await;

        // 三个分组，两个间隔
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "elapsed: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_zero_limit_runs_sequentially() {
        let probe = ConcurrencyProbe::new();
        let requests = (0..3)
            .map(|i| {
                let probe = probe.clone();
                FetchRequest::new(format!("req-{i}"), async move {
                    let _slot = probe.enter();
                    tokio::task::yield_now().await;
                    Ok(i)
                })
            })
            .collect();

        let outcomes = run_batched(requests, 0, Duration::ZERO).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(probe.peak(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcomes = run_batched::<u32>(Vec::new(), 4, Duration::from_secs(1)).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_batch_runner_uses_config() {
        let runner = BatchRunner::new(BatchConfig {
            concurrency_limit: 2,
            inter_batch_delay_ms: 0,
        });
        let outcomes = runner.run((0..4).map(ok_request).collect()).await;
        assert_eq!(runner.concurrency_limit(), 2);
        assert_eq!(BatchSummary::from(outcomes.as_slice()).succeeded, 4);
    }
}
