use thiserror::Error;

/// SDK 统一错误类型
///
/// 变体按故障来源分组：
/// - 网络瞬时错误：`Transport` / `Timeout`
/// - 远端拒绝：`RemoteRejection`（非成功响应，与网络错误同样重试）
/// - 本地持久化错误：`KvStore` / `Serialization` / `IO`
/// - 调用方错误：其余变体
#[derive(Debug, Error)]
pub enum CampusPinError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Remote rejected request (status {status:?}): {message}")]
    RemoteRejection {
        status: Option<u16>,
        message: String,
    },
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

/// 故障分类（决定降级/入队/上报策略）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 超时、离线，总是可恢复
    TransientNetwork,
    /// 远端返回非成功，按瞬时错误处理
    RemoteRejection,
    /// 序列化或存储失败，仅中止当前操作
    LocalPersistence,
    /// 参数、状态或配置错误
    Caller,
}

impl CampusPinError {
    /// 获取错误分类
    pub fn class(&self) -> FailureClass {
        match self {
            CampusPinError::Transport(_) | CampusPinError::Timeout(_) => {
                FailureClass::TransientNetwork
            }
            CampusPinError::RemoteRejection { .. } => FailureClass::RemoteRejection,
            CampusPinError::KvStore(_)
            | CampusPinError::Serialization(_)
            | CampusPinError::IO(_) => FailureClass::LocalPersistence,
            _ => FailureClass::Caller,
        }
    }

    /// 远端调用失败是否应当稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            FailureClass::TransientNetwork | FailureClass::RemoteRejection
        )
    }

    /// 是否为本地持久化错误
    pub fn is_local_persistence(&self) -> bool {
        self.class() == FailureClass::LocalPersistence
    }

    /// 从 HTTP 状态码和响应体创建远端拒绝错误
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        CampusPinError::RemoteRejection {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<sled::Error> for CampusPinError {
    fn from(error: sled::Error) -> Self {
        CampusPinError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for CampusPinError {
    fn from(error: serde_json::Error) -> Self {
        CampusPinError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for CampusPinError {
    fn from(error: std::io::Error) -> Self {
        CampusPinError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for CampusPinError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            CampusPinError::Timeout(error.to_string())
        } else if let Some(status) = error.status() {
            CampusPinError::rejected(status.as_u16(), error.to_string())
        } else if error.is_decode() {
            CampusPinError::Serialization(error.to_string())
        } else {
            CampusPinError::Transport(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CampusPinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(
            CampusPinError::Transport("offline".into()).class(),
            FailureClass::TransientNetwork
        );
        assert_eq!(
            CampusPinError::rejected(500, "boom").class(),
            FailureClass::RemoteRejection
        );
        assert_eq!(
            CampusPinError::KvStore("disk full".into()).class(),
            FailureClass::LocalPersistence
        );
        assert_eq!(
            CampusPinError::NotFound("pin".into()).class(),
            FailureClass::Caller
        );
    }

    #[test]
    fn test_rejection_is_retryable_like_network_errors() {
        assert!(CampusPinError::Timeout("slow".into()).is_retryable());
        assert!(CampusPinError::rejected(404, "gone").is_retryable());
        assert!(!CampusPinError::Serialization("bad json".into()).is_retryable());
        assert!(!CampusPinError::InvalidArgument("empty title".into()).is_retryable());
    }
}
