//! 地理编码与天气抓取器
//!
//! 基于 `questline_shared` 的缓存编排器、分类重试和批量执行，
//! 为两个外部服务提供带缓存、可重试、限并发的查询接口。

pub mod cli;
pub mod client;
pub mod geocoding;
pub mod keys;
pub mod models;
pub mod weather;

use std::time::Duration;

use questline_shared::cache::build_orchestrator;
use questline_shared::config::AppConfig;
use questline_shared::{BatchRunner, CacheOrchestrator, Result};

pub use client::UpstreamClient;
pub use geocoding::GeocodingFetcher;
pub use models::{GeoPoint, Place, WeatherReport};
pub use weather::WeatherFetcher;

/// 未配置单次调用超时时 HTTP 客户端使用的超时
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 共享同一个编排器的全部抓取器
#[derive(Debug, Clone)]
pub struct Fetchers {
    pub orchestrator: CacheOrchestrator,
    pub geocoding: GeocodingFetcher,
    pub weather: WeatherFetcher,
}

impl Fetchers {
    /// 按配置创建存储、编排器和两个抓取器
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let orchestrator = build_orchestrator(config)?;
        Self::with_orchestrator(config, orchestrator)
    }

    /// 使用已有的编排器创建抓取器
    pub fn with_orchestrator(config: &AppConfig, orchestrator: CacheOrchestrator) -> Result<Self> {
        let policy = config.retry.to_policy();
        let timeout = policy.attempt_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let batch = BatchRunner::new(config.batch.clone());
        let upstream = &config.upstream;

        let geocoding = GeocodingFetcher::new(
            UpstreamClient::new("geocoding", &upstream.geocoding, timeout)?,
            orchestrator.clone(),
            policy.clone(),
            batch.clone(),
            upstream.geocoding.cache_ttl(),
        );
        let weather = WeatherFetcher::new(
            UpstreamClient::new("weather", &upstream.weather, timeout)?,
            orchestrator.clone(),
            policy,
            batch,
            upstream.weather.cache_ttl(),
        );

        Ok(Self {
            orchestrator,
            geocoding,
            weather,
        })
    }
}
