//! 天气抓取器
//!
//! 查询当前天气，兼容 Open-Meteo 的 `/v1/forecast` 接口。坐标取整到 2 位小数后再请求，
//! 缓存中的值与缓存键描述的位置一致。

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use questline_shared::{
    BatchRunner, CacheOrchestrator, FetchError, FetchRequest, Outcome, Result, RetryPolicy, retry,
};
use serde::Deserialize;
use tracing::instrument;

use crate::client::UpstreamClient;
use crate::keys::{WEATHER_PRECISION, current_weather_key};
use crate::models::{GeoPoint, WeatherReport};

const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m,weather_code";

/// 上游时间为不带秒的 ISO 8601 格式
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    temperature_2m: f64,
    wind_speed_10m: f64,
    weather_code: u16,
}

/// 天气抓取器
#[derive(Debug, Clone)]
pub struct WeatherFetcher {
    client: UpstreamClient,
    orchestrator: CacheOrchestrator,
    policy: RetryPolicy,
    batch: BatchRunner,
    ttl: Duration,
}

impl WeatherFetcher {
    pub fn new(
        client: UpstreamClient,
        orchestrator: CacheOrchestrator,
        policy: RetryPolicy,
        batch: BatchRunner,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            orchestrator,
            policy,
            batch,
            ttl,
        }
    }

    /// 指定位置的当前天气，相邻约 1 公里内的位置共享缓存条目
    #[instrument(skip(self))]
    pub async fn current(&self, point: GeoPoint) -> Result<WeatherReport> {
        let point = point.rounded(WEATHER_PRECISION);
        let key = current_weather_key(point);
        let client = self.client.clone();
        let policy = self.policy.clone();

        self.orchestrator
            .get_or_compute(&key, self.ttl, move || async move {
                retry(&policy, "current_weather", || fetch_current(&client, point)).await
            })
            .await
    }

    /// 批量查询，结果与输入顺序一致
    pub async fn current_many(&self, points: &[GeoPoint]) -> Vec<Outcome<WeatherReport>> {
        let requests = points
            .iter()
            .map(|&point| {
                let fetcher = self.clone();
                FetchRequest::new(format!("{},{}", point.lat, point.lon), async move {
                    fetcher.current(point).await
                })
            })
            .collect();

        self.batch.run(requests).await
    }
}

async fn fetch_current(client: &UpstreamClient, point: GeoPoint) -> Result<WeatherReport> {
    let lat = point.lat.to_string();
    let lon = point.lon.to_string();
    let response: ForecastResponse = client
        .get_json(
            "/v1/forecast",
            &[
                ("latitude", lat.as_str()),
                ("longitude", lon.as_str()),
                ("current", CURRENT_FIELDS),
            ],
        )
        .await?;

    let current = response.current;
    let observed_at = NaiveDateTime::parse_from_str(&current.time, TIME_FORMAT).map_err(|e| {
        FetchError::MalformedResponse {
            service: client.provider().to_string(),
            message: format!("无法解析观测时间 {}: {e}", current.time),
        }
    })?;

    Ok(WeatherReport {
        point,
        temperature_c: current.temperature_2m,
        wind_speed_kmh: current.wind_speed_10m,
        weather_code: current.weather_code,
        observed_at,
        fetched_at: Utc::now(),
    })
}
