//! 领域模型
//!
//! 这些类型会被序列化写入缓存，字段变更需要同步调整缓存键或清空旧条目。

use chrono::{DateTime, NaiveDateTime, Utc};
use questline_shared::{FetchError, Result};
use serde::{Deserialize, Serialize};

/// 经纬度坐标（WGS84，单位为度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// 创建坐标，超出范围或非有限值时返回 `InvalidArgument`
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(FetchError::invalid_argument("lat", format!("纬度超出范围: {lat}")));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(FetchError::invalid_argument("lon", format!("经度超出范围: {lon}")));
        }
        Ok(Self { lat, lon })
    }

    /// 按小数位数取整，`-0.0` 统一为 `0.0`
    pub fn rounded(&self, decimals: i32) -> Self {
        Self {
            lat: round_to(self.lat, decimals),
            lon: round_to(self.lon, decimals),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// 逆地理编码得到的地点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub display_name: String,
    pub point: GeoPoint,
    pub city: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
}

/// 当前天气
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// 请求所用的坐标（已取整）
    pub point: GeoPoint,
    pub temperature_c: f64,
    pub wind_speed_kmh: f64,
    /// WMO 天气代码
    pub weather_code: u16,
    /// 上游观测时间（UTC）
    pub observed_at: NaiveDateTime,
    pub fetched_at: DateTime<Utc>,
}

impl WeatherReport {
    /// WMO 天气代码的简短描述
    pub fn summary(&self) -> &'static str {
        match self.weather_code {
            0 => "clear sky",
            1..=3 => "partly cloudy",
            45 | 48 => "fog",
            51..=57 => "drizzle",
            61..=67 | 80..=82 => "rain",
            71..=77 | 85 | 86 => "snow",
            95..=99 => "thunderstorm",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(52.52, 13.405).is_ok());
        assert!(matches!(
            GeoPoint::new(91.0, 0.0),
            Err(FetchError::InvalidArgument { .. })
        ));
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_rounding_normalizes_negative_zero() {
        let point = GeoPoint::new(-0.000001, 13.404954).unwrap().rounded(2);
        assert_eq!(point.lat.to_string(), "0");
        assert_eq!(point.lon, 13.4);
    }

    #[test]
    fn test_weather_summary() {
        let report = WeatherReport {
            point: GeoPoint { lat: 0.0, lon: 0.0 },
            temperature_c: 21.5,
            wind_speed_kmh: 3.0,
            weather_code: 63,
            observed_at: NaiveDateTime::default(),
            fetched_at: Utc::now(),
        };
        assert_eq!(report.summary(), "rain");
    }
}
