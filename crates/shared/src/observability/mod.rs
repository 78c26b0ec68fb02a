//! 日志、追踪与指标的初始化
//!
//! CLI 与基准入口只调用一次 [`init`]，返回的 [`ObservabilityGuard`] 需要存活到进程退出。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 写入追踪 resource 的服务名
    pub service_name: String,

    /// OTLP gRPC 端点；空白或缺省时只输出本地日志
    pub otlp_endpoint: Option<String>,

    /// 是否在 `metrics_port` 上暴露 Prometheus `/metrics`
    pub metrics_enabled: bool,

    pub metrics_port: u16,

    /// `RUST_LOG` 未设置时使用的过滤指令
    pub log_level: String,

    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            otlp_endpoint: None,
            metrics_enabled: false,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }

    /// 是否需要导出 span
    pub fn otlp_enabled(&self) -> bool {
        self.otlp_endpoint
            .as_deref()
            .is_some_and(|endpoint| !endpoint.trim().is_empty())
    }
}

/// 持有追踪 provider 与指标服务，Drop 时刷新未导出的 span
pub struct ObservabilityGuard {
    _tracing: Option<tracing::TracingGuard>,
    _metrics: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 不安装任何全局组件，测试中使用
    pub fn empty() -> Self {
        Self {
            _tracing: None,
            _metrics: None,
        }
    }
}

/// 先安装日志，再按配置启动指标导出
///
/// 指标未启用时仍会注册描述信息，`metrics` 宏在没有 recorder 时为空操作。
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        metrics::describe_metrics();
        None
    };

    info!(
        service = %config.service_name,
        otlp = config.otlp_enabled(),
        metrics_port = config.metrics_enabled.then_some(config.metrics_port),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard {
        _tracing: Some(tracing_guard),
        _metrics: metrics_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
        assert!(!config.metrics_enabled);
        assert!(!config.otlp_enabled());
    }

    #[test]
    fn test_otlp_enabled_requires_endpoint() {
        let mut config = ObservabilityConfig::default().with_service_name("geo-fetcher");
        assert_eq!(config.service_name, "geo-fetcher");

        config.otlp_endpoint = Some("http://localhost:4317".to_string());
        assert!(config.otlp_enabled());

        config.otlp_endpoint = Some(String::new());
        assert!(!config.otlp_enabled());
    }

    #[test]
    fn test_empty_guard_drops_cleanly() {
        drop(ObservabilityGuard::empty());
    }
}
