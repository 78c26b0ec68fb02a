//! 抓取器使用的缓存键
//!
//! - `geocode:fwd:{规范化地址}`
//! - `geocode:rev:{lat}:{lon}`，坐标保留 5 位小数（约 1 米）
//! - `weather:current:{lat}:{lon}`，坐标保留 2 位小数（约 1 公里），相邻位置共享条目

use questline_shared::CacheKey;

use crate::models::GeoPoint;

pub const GEOCODE_NAMESPACE: &str = "geocode";
pub const WEATHER_NAMESPACE: &str = "weather";

/// 逆地理编码的坐标精度
pub const REVERSE_PRECISION: i32 = 5;
/// 天气查询的坐标精度
pub const WEATHER_PRECISION: i32 = 2;

/// 去除首尾空白、合并连续空白并转为小写
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn forward_geocode_key(address: &str) -> CacheKey {
    CacheKey::builder(GEOCODE_NAMESPACE)
        .segment("fwd")
        .segment(normalize_address(address))
        .build()
}

pub fn reverse_geocode_key(point: GeoPoint) -> CacheKey {
    coordinate_key(GEOCODE_NAMESPACE, "rev", point, REVERSE_PRECISION)
}

pub fn current_weather_key(point: GeoPoint) -> CacheKey {
    coordinate_key(WEATHER_NAMESPACE, "current", point, WEATHER_PRECISION)
}

fn coordinate_key(namespace: &str, kind: &str, point: GeoPoint, decimals: i32) -> CacheKey {
    let point = point.rounded(decimals);
    let precision = decimals as usize;
    CacheKey::builder(namespace)
        .segment(kind)
        .segment(format!("{:.*}", precision, point.lat))
        .segment(format!("{:.*}", precision, point.lon))
        .build()
}
