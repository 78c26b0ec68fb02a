//! 地理编码抓取器
//!
//! 正向（地址 → 坐标）与逆向（坐标 → 地点）查询，兼容 Nominatim 的 `jsonv2` 响应格式。

use std::time::Duration;

use questline_shared::{
    BatchRunner, CacheOrchestrator, FetchError, FetchRequest, Outcome, Result, RetryPolicy, retry,
};
use serde::Deserialize;
use tracing::instrument;

use crate::client::UpstreamClient;
use crate::keys::{REVERSE_PRECISION, forward_geocode_key, normalize_address, reverse_geocode_key};
use crate::models::{GeoPoint, Place};

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    /// 坐标无法解析为地点时上游以 200 返回 `{"error": ...}`
    error: Option<String>,
    display_name: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    #[serde(default)]
    address: ReverseAddress,
}

#[derive(Debug, Default, Deserialize)]
struct ReverseAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

/// 地理编码抓取器
#[derive(Debug, Clone)]
pub struct GeocodingFetcher {
    client: UpstreamClient,
    orchestrator: CacheOrchestrator,
    policy: RetryPolicy,
    batch: BatchRunner,
    ttl: Duration,
}

impl GeocodingFetcher {
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

    /// 地址 → 坐标
    ///
    /// 大小写和空白不同的地址共享同一缓存条目。上游没有结果时返回 `NotFound`。
    #[instrument(skip(self))]
    pub async fn geocode(&self, address: &str) -> Result<GeoPoint> {
        let query = normalize_address(address);
        if query.is_empty() {
            return Err(FetchError::invalid_argument("address", "地址不能为空"));
        }

        let key = forward_geocode_key(&query);
        let client = self.client.clone();
        let policy = self.policy.clone();

        self.orchestrator
            .get_or_compute(&key, self.ttl, move || async move {
                retry(&policy, "geocode", || search(&client, &query)).await
            })
            .await
    }

    /// 坐标 → 地点
    #[instrument(skip(self))]
    pub async fn reverse(&self, point: GeoPoint) -> Result<Place> {
        let point = point.rounded(REVERSE_PRECISION);
        let key = reverse_geocode_key(point);
        let client = self.client.clone();
        let policy = self.policy.clone();

        self.orchestrator
            .get_or_compute(&key, self.ttl, move || async move {
                retry(&policy, "reverse_geocode", || reverse(&client, point)).await
            })
            .await
    }

    /// 批量正向查询，结果与输入顺序一致，单个地址失败不影响其他地址
    pub async fn geocode_many(&self, addresses: &[String]) -> Vec<Outcome<GeoPoint>> {
        let requests = addresses
            .iter()
            .map(|address| {
                let fetcher = self.clone();
                let address = address.clone();
                FetchRequest::new(address.clone(), async move { fetcher.geocode(&address).await })
            })
            .collect();

        self.batch.run(requests).await
    }
}

async fn search(client: &UpstreamClient, query: &str) -> Result<GeoPoint> {
    let hits: Vec<SearchHit> = client
        .get_json(
            "/search",
            &[("q", query), ("format", "jsonv2"), ("limit", "1")],
        )
        .await?;

    let hit = hits
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::not_found(format!("address '{query}'")))?;

    let lat = parse_coordinate(client, "lat", &hit.lat)?;
    let lon = parse_coordinate(client, "lon", &hit.lon)?;
    GeoPoint::new(lat, lon).map_err(|e| malformed(client, e.to_string()))
}

async fn reverse(client: &UpstreamClient, point: GeoPoint) -> Result<Place> {
    let lat = point.lat.to_string();
    let lon = point.lon.to_string();
    let response: ReverseResponse = client
        .get_json(
            "/reverse",
            &[("lat", lat.as_str()), ("lon", lon.as_str()), ("format", "jsonv2")],
        )
        .await?;

    if let Some(reason) = response.error {
        return Err(FetchError::not_found(format!("place at {lat},{lon} ({reason})")));
    }

    let display_name = response
        .display_name
        .ok_or_else(|| malformed(client, "缺少 display_name"))?;

    // 上游会把坐标吸附到最近的对象上，缺失时沿用请求坐标
    let resolved = match (response.lat, response.lon) {
        (Some(lat), Some(lon)) => GeoPoint::new(
            parse_coordinate(client, "lat", &lat)?,
            parse_coordinate(client, "lon", &lon)?,
        )
        .map_err(|e| malformed(client, e.to_string()))?,
        _ => point,
    };

    let address = response.address;
    Ok(Place {
        display_name,
        point: resolved,
        city: address.city.or(address.town).or(address.village),
        country: address.country,
        country_code: address.country_code,
    })
}

fn parse_coordinate(client: &UpstreamClient, field: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| malformed(client, format!("{field} 不是合法的数字: {raw}")))
}

fn malformed(client: &UpstreamClient, message: impl Into<String>) -> FetchError {
    FetchError::MalformedResponse {
        service: client.provider().to_string(),
        message: message.into(),
    }
}
