//! 上游 HTTP 客户端
//!
//! 唯一知道 HTTP 的地方：把状态码和传输层错误映射为 [`FetchError`]，
//! 并用信号量限制对单个服务商的并发请求数。

use std::sync::Arc;
use std::time::{Duration, Instant};

use questline_shared::config::ProviderConfig;
use questline_shared::observability::metrics::record_upstream_request;
use questline_shared::{FetchError, Result};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

/// 错误响应体在错误信息中保留的最大长度
const MAX_ERROR_BODY: usize = 256;

/// 单个服务商的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl UpstreamClient {
    pub fn new(
        provider: impl Into<String>,
        config: &ProviderConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            provider: provider.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// 发送 GET 请求并解析 JSON 响应
    #[instrument(skip(self, query), fields(provider = %self.provider))]
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Internal(format!("{} 请求许可已关闭", self.provider)))?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = self.transport_error(e, started.elapsed());
                let label = if matches!(err, FetchError::Timeout { .. }) { "timeout" } else { "network" };
                record_upstream_request(&self.provider, label, started.elapsed().as_secs_f64());
                return Err(err);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| self.transport_error(e, started.elapsed()));
        record_upstream_request(&self.provider, status.as_str(), started.elapsed().as_secs_f64());
        let body = body?;

        if !status.is_success() {
            let err = status_error(&self.provider, path, status, &headers, &body);
            debug!(status = status.as_u16(), error = %err, "上游返回错误状态");
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse {
            service: self.provider.clone(),
            message: e.to_string(),
        })
    }

    fn transport_error(&self, err: reqwest::Error, elapsed: Duration) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                operation: self.provider.clone(),
                elapsed,
            }
        } else {
            FetchError::Network(format!("{}: {err}", self.provider))
        }
    }
}

/// 将非 2xx 状态映射为错误
///
/// - 404 → `NotFound`
/// - 401 / 403 → `Unauthorized` / `Forbidden`
/// - 429 → `RateLimited`，携带 `Retry-After` 秒数
/// - 其余状态 → `Upstream`（5xx 可重试，4xx 不可重试）
pub fn status_error(
    provider: &str,
    resource: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::not_found(format!("{provider}{resource}")),
        StatusCode::UNAUTHORIZED => FetchError::Unauthorized {
            service: provider.to_string(),
        },
        StatusCode::FORBIDDEN => FetchError::Forbidden {
            service: provider.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            service: provider.to_string(),
            retry_after: parse_retry_after(headers),
        },
        _ => FetchError::Upstream {
            service: provider.to_string(),
            status: status.as_u16(),
            message: truncate(body, MAX_ERROR_BODY),
        },
    }
}

/// 解析以秒为单位的 `Retry-After`，HTTP 日期格式忽略
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
