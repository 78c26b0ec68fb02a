//! 共享库
//!
//! 包含弹性抓取层的核心组件：单飞 cache-aside 编排器、分类重试、有界并发批量执行，
//! 以及配置、错误处理、可观测性等基础设施代码。

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
pub mod test_utils;

pub use batch::{BatchRunner, BatchSummary, FetchRequest, Outcome, run_batched};
pub use cache::{CacheKey, CacheOrchestrator, CacheStore, InvalidateOutcome};
pub use error::{ErrorClass, FetchError, Result};
pub use retry::{Backoff, RetryPolicy, retry, retry_classified};
