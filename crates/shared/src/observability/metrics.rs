//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 描述缓存层使用的全部指标
///
/// 这些描述会出现在 `/metrics` 端点的 HELP 注释中。未安装 recorder 时调用无副作用。
pub fn describe_metrics() {
    metrics::describe_counter!(
        "cache_requests_total",
        "Cache lookups by result (hit, miss, coalesced, corrupt)"
    );
    metrics::describe_counter!(
        "cache_store_errors_total",
        "Cache store operations that failed and were degraded"
    );
    metrics::describe_histogram!(
        "cache_compute_duration_seconds",
        "Duration of cache-miss computations in seconds"
    );
    metrics::describe_gauge!("cache_in_flight", "Computations currently in flight");

    metrics::describe_counter!(
        "retry_attempts_total",
        "Retry attempts by operation and outcome"
    );
    metrics::describe_histogram!(
        "retry_backoff_seconds",
        "Backoff delay applied before a retry in seconds"
    );

    metrics::describe_counter!("batch_items_total", "Batch items by outcome");
    metrics::describe_counter!("batch_groups_total", "Batch groups executed");

    metrics::describe_counter!(
        "upstream_requests_total",
        "Upstream HTTP requests by provider and status"
    );
    metrics::describe_histogram!(
        "upstream_request_duration_seconds",
        "Upstream HTTP request duration in seconds"
    );
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录上游 HTTP 请求
///
/// `status` 为 HTTP 状态码或传输层错误标签（如 "timeout"、"network"）。
#[inline]
pub fn record_upstream_request(provider: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "upstream_requests_total",
        "provider" => provider.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "upstream_request_duration_seconds",
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        describe_metrics();
        record_upstream_request("nominatim", "200", 0.1);
        record_upstream_request("open-meteo", "timeout", 10.0);
        assert!(get_handle().is_none());
    }
}
