//! 缓存键
//!
//! 同一逻辑请求必须总是生成同一个键，不同的逻辑请求绝不能碰撞。
//! 键由命名空间、若干主体片段和按名称排序的参数组成：
//!
//! ```text
//! geocode:fwd:berlin%3A mitte?lang=de&limit=1
//! ```
//!
//! 片段中的分隔字符会被转义，调用方无法通过构造片段伪造其他键。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 超过该长度的键，其参数部分以摘要代替
const MAX_KEY_LEN: usize = 200;

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// 以命名空间开始构建缓存键
    pub fn builder(namespace: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            namespace: escape(namespace),
            segments: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// 用已有字符串直接构造（例如从日志或配置读取的键）
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// 命名空间前缀，用于按前缀失效
    pub fn prefix(namespace: &str) -> String {
        format!("{}:", escape(namespace))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self::from_raw(raw)
    }
}

/// 缓存键构建器
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    segments: Vec<String>,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// 追加一个主体片段（如 "fwd"、地址、坐标）
    pub fn segment(mut self, segment: impl AsRef<str>) -> Self {
        self.segments.push(escape(segment.as_ref()));
        self
    }

    /// 追加一个参数；同名参数以最后一次为准，参数顺序不影响结果
    pub fn param(mut self, name: impl AsRef<str>, value: impl ToString) -> Self {
        self.params
            .insert(escape(name.as_ref()), escape(&value.to_string()));
        self
    }

    pub fn build(self) -> CacheKey {
        let mut key = self.namespace;
        for segment in &self.segments {
            key.push(':');
            key.push_str(segment);
        }

        if self.params.is_empty() {
            return CacheKey(key);
        }

        let query = self
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        if key.len() + query.len() + 1 > MAX_KEY_LEN {
            let digest = Sha256::digest(query.as_bytes());
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            key.push_str("?#");
            key.push_str(&hex);
        } else {
            key.push('?');
            key.push_str(&query);
        }

        CacheKey(key)
    }
}

/// 转义会破坏键结构的字符
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '#' => out.push_str("%23"),
            '*' => out.push_str("%2A"),
            other => out.push(other),
        }
    }
    out
}
