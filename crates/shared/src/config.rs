//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;
use crate::retry::{Backoff, RetryPolicy};

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// 缓存后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// 进程内存储，适用于单实例和测试
    #[default]
    Memory,
    /// Redis 存储，多实例共享
    Redis,
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// 写入存储时统一附加的键前缀
    pub key_prefix: String,
    pub default_ttl_seconds: u64,
    /// 检测到无法反序列化的缓存条目时是否主动删除
    pub evict_corrupt_entries: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            key_prefix: "questline:".to_string(),
            default_ttl_seconds: 3600,
            evict_corrupt_entries: true,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

/// 退避方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Linear,
    Exponential,
}

/// 重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 总尝试次数（包含首次调用）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: BackoffKind,
    /// 仅对指数退避生效
    pub multiplier: f64,
    /// 单次调用超时，0 表示不限制
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffKind::Linear,
            multiplier: 2.0,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// 转换为运行时重试策略
    pub fn to_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::Linear => Backoff::Linear,
            BackoffKind::Exponential => Backoff::Exponential {
                multiplier: self.multiplier,
            },
        };

        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff,
            attempt_timeout: (self.attempt_timeout_ms > 0)
                .then(|| Duration::from_millis(self.attempt_timeout_ms)),
        }
    }
}

/// 批量抓取配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency_limit: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            inter_batch_delay_ms: 1000,
        }
    }
}

impl BatchConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

/// 单个上游服务商配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// 同时发往该服务商的最大请求数
    pub max_concurrent_requests: usize,
    pub user_agent: String,
    pub cache_ttl_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8089".to_string(),
            api_key: None,
            max_concurrent_requests: 4,
            user_agent: concat!("questline/", env!("CARGO_PKG_VERSION")).to_string(),
            cache_ttl_seconds: 3600,
        }
    }
}

impl ProviderConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// 上游服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub geocoding: ProviderConfig,
    pub weather: ProviderConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            geocoding: ProviderConfig {
                base_url: "https://nominatim.openstreetmap.org".to_string(),
                max_concurrent_requests: 1,
                // 地理编码结果基本不变，缓存一周
                cache_ttl_seconds: 7 * 24 * 3600,
                ..ProviderConfig::default()
            },
            weather: ProviderConfig {
                base_url: "https://api.open-meteo.com".to_string(),
                max_concurrent_requests: 4,
                cache_ttl_seconds: 600,
                ..ProviderConfig::default()
            },
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub upstream: UpstreamConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（QUESTLINE_ 前缀，双下划线分隔层级，如 QUESTLINE_REDIS__URL -> redis.url）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("QUESTLINE_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("QUESTLINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        // 可观测性模块以服务名标识指标和追踪来源
        if config.observability.service_name.is_empty() {
            config.observability.service_name = config.service_name.clone();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.batch.concurrency_limit, 5);
        assert_eq!(config.upstream.geocoding.max_concurrent_requests, 1);
    }

    #[test]
    fn test_retry_config_to_policy() {
        let policy = RetryConfig::default().to_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff, Backoff::Linear);
        assert_eq!(policy.attempt_timeout, Some(Duration::from_secs(10)));

        let policy = RetryConfig {
            max_attempts: 0,
            backoff: BackoffKind::Exponential,
            attempt_timeout_ms: 0,
            ..RetryConfig::default()
        }
        .to_policy();
        // 至少执行一次
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, Backoff::Exponential { multiplier: 2.0 });
        assert!(policy.attempt_timeout.is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: AppConfig = Config::builder()
            .set_override("cache.backend", "redis")
            .unwrap()
            .set_override("batch.concurrency_limit", 2)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.batch.concurrency_limit, 2);
        // 未覆盖的字段保持默认值
        assert_eq!(config.cache.key_prefix, "questline:");
        assert_eq!(config.retry.base_delay_ms, 1000);
    }
}
