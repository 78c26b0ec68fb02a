//! 日志与分布式追踪
//!
//! 日志统一写入标准错误，CLI 的标准输出只承载查询结果。
//! 配置了 OTLP 端点时额外挂载 OpenTelemetry 层，缓存计算和重试的 span 会导出到追踪后端。

use anyhow::{Context, Result};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// 持有 TracerProvider，Drop 时刷新尚未导出的 span
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
        }
    }
}

/// 安装全局 subscriber
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let provider = match config.otlp_endpoint.as_deref() {
        Some(endpoint) if config.otlp_enabled() => {
            Some(tracer_provider(&config.service_name, endpoint)?)
        }
        _ => None,
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(fmt_layer(config.json_logs))
        .with(otel_layer)
        .try_init()
        .context("tracing subscriber 已经初始化")?;

    Ok(TracingGuard { provider })
}

/// `RUST_LOG` 优先；配置的级别无法解析时回退到 info
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    if json {
        // JSON 日志带上 span 关闭事件，便于统计单次计算耗时
        layer
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .boxed()
    } else {
        layer.compact().boxed()
    }
}

fn tracer_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("无法创建 OTLP exporter: {endpoint}"))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(
            Resource::builder()
                .with_attribute(KeyValue::new(SERVICE_NAME, service_name.to_string()))
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// 当前 span 所属的 trace ID
///
/// 未启用 OpenTelemetry 或不在 span 内时返回 `None`。缓存存储降级和重试放弃等告警日志
/// 携带该字段，便于在日志中检索对应的追踪。
pub fn current_trace_id() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_absent_without_provider() {
        let span = tracing::info_span!("cache_lookup");
        let _entered = span.enter();
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn test_invalid_level_falls_back() {
        // 非法的过滤指令不会导致初始化失败
        let filter = env_filter("not a [valid directive");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_blank_endpoint_disables_export() {
        let config = ObservabilityConfig {
            otlp_endpoint: Some("  ".to_string()),
            ..ObservabilityConfig::default().with_service_name("geo-fetcher")
        };
        assert!(!config.otlp_enabled());
    }
}
