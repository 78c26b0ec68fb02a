//! 统一错误处理模块
//!
//! 定义缓存层与上游抓取共用的错误类型，以及驱动重试决策的错误分类。
//! 错误需要在单飞计算的所有等待者之间共享，因此 `FetchError` 实现了 `Clone`，
//! 第三方错误在转换时被折叠为字符串。

use std::time::Duration;

use thiserror::Error;

/// 错误分类
///
/// 每次失败都会重新计算，从不持久化。决定一次失败是立即返回还是退避后重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// 资源不存在，重试无意义
    NotFound,
    /// 凭证无效或权限不足，重试无意义
    Unauthorized,
    /// 上游限流
    RateLimited,
    /// 网络抖动、超时、上游 5xx、响应体损坏
    TransientNetwork,
    /// 其余不可恢复的错误
    Terminal,
}

impl ErrorClass {
    /// 该分类是否允许重试
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetwork)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::TransientNetwork => "transient_network",
            Self::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 系统错误类型
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    // ==================== 上游错误 ====================
    #[error("资源不存在: {resource}")]
    NotFound { resource: String },

    #[error("未授权访问: {service}")]
    Unauthorized { service: String },

    #[error("权限不足: {service}")]
    Forbidden { service: String },

    #[error("上游限流: {service}")]
    RateLimited {
        service: String,
        retry_after: Option<Duration>,
    },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("调用超时: {operation} ({elapsed:?})")]
    Timeout { operation: String, elapsed: Duration },

    #[error("上游响应格式错误: {service} - {message}")]
    MalformedResponse { service: String, message: String },

    #[error("上游返回错误: {service} status={status} - {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("重试次数已耗尽: {operation} 共尝试 {attempts} 次, 最后错误: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<FetchError>,
    },

    // ==================== 缓存错误 ====================
    #[error("缓存存储错误: {0}")]
    Store(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("存储后端不支持该操作: {operation}")]
    Unsupported { operation: &'static str },

    // ==================== 通用错误 ====================
    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::Store(_) => "STORE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 将错误归入通用分类
    ///
    /// 未能明确归类的错误（`Internal`）按瞬时故障处理。
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Unauthorized { .. } | Self::Forbidden { .. } => ErrorClass::Unauthorized,
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Network(_)
            | Self::Timeout { .. }
            | Self::MalformedResponse { .. }
            | Self::Store(_)
            | Self::Internal(_) => ErrorClass::TransientNetwork,
            Self::Upstream { status, .. } if *status >= 500 => ErrorClass::TransientNetwork,
            Self::Upstream { .. }
            | Self::RetriesExhausted { .. }
            | Self::Serialization(_)
            | Self::Unsupported { .. }
            | Self::InvalidArgument { .. } => ErrorClass::Terminal,
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// 对最终调用方而言是否属于硬失败
    ///
    /// 瞬时分类只会在重试器内部出现；穿透到调用方的 `Terminal` 或
    /// `RetriesExhausted` 必须作为请求失败处理。
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. }) || self.class() == ErrorClass::Terminal
    }

    /// 建议的重试等待时间（仅限流错误携带）
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// 剥离 `RetriesExhausted` 包装，返回最初的失败原因
    pub fn root_cause(&self) -> &FetchError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for FetchError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = FetchError::not_found("geocode:fwd:nowhere");
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(
            FetchError::Unsupported { operation: "clear" }.code(),
            "UNSUPPORTED"
        );
    }

    #[test]
    fn test_classification() {
        assert_eq!(FetchError::not_found("x").class(), ErrorClass::NotFound);
        assert_eq!(
            FetchError::Forbidden {
                service: "weather".to_string()
            }
            .class(),
            ErrorClass::Unauthorized
        );
        assert_eq!(
            FetchError::Network("connection reset".to_string()).class(),
            ErrorClass::TransientNetwork
        );
        assert_eq!(
            FetchError::Internal("unexpected".to_string()).class(),
            ErrorClass::TransientNetwork
        );
        assert_eq!(
            FetchError::invalid_argument("ttl", "must be positive").class(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_upstream_status_classification() {
        let server_error = FetchError::Upstream {
            service: "geocoding".to_string(),
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(server_error.is_retryable());

        let bad_request = FetchError::Upstream {
            service: "geocoding".to_string(),
            status: 400,
            message: "bad query".to_string(),
        };
        assert!(!bad_request.is_retryable());
        assert!(bad_request.is_hard_failure());
    }

    #[test]
    fn test_malformed_response_is_retryable() {
        let err = FetchError::MalformedResponse {
            service: "weather".to_string(),
            message: "missing field `current`".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_hard_failure());
    }

    #[test]
    fn test_retries_exhausted_keeps_root_cause() {
        let err = FetchError::RetriesExhausted {
            operation: "geocode".to_string(),
            attempts: 3,
            last: Box::new(FetchError::RateLimited {
                service: "geocoding".to_string(),
                retry_after: Some(Duration::from_secs(2)),
            }),
        };
        assert!(err.is_hard_failure());
        assert!(!err.is_retryable());
        assert_eq!(err.root_cause().class(), ErrorClass::RateLimited);
        assert_eq!(err.root_cause().retry_after(), Some(Duration::from_secs(2)));
    }
}
