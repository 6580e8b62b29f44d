use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CampusPinError, FailureClass};

/// 同步失败原因分类
///
/// 远端协议无法区分"稍后重试"和"永远失败"，所以所有远端失败都可重试，
/// 只有退避倍数不同。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FailureReason {
    /// 网络超时
    NetworkTimeout,
    /// 网络不可用 - 等待恢复后重试
    NetworkUnavailable,
    /// 远端返回非成功
    Rejected(Option<u16>),
    /// 本地持久化失败
    LocalPersistence,
    /// 未知错误
    Unknown(String),
}

impl FailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureReason::NetworkTimeout
            | FailureReason::NetworkUnavailable
            | FailureReason::Rejected(_) => true,
            // 存储恢复前重试也只会再次失败，但下一个周期依然会尝试
            FailureReason::LocalPersistence => true,
            FailureReason::Unknown(_) => true,
        }
    }

    /// 获取重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            FailureReason::NetworkTimeout => 1.0,
            FailureReason::NetworkUnavailable => 2.0,
            FailureReason::Rejected(_) => 1.5,
            FailureReason::LocalPersistence => 3.0,
            FailureReason::Unknown(_) => 1.0,
        }
    }
}

/// 从错误转换为失败原因
impl From<&CampusPinError> for FailureReason {
    fn from(error: &CampusPinError) -> Self {
        match error {
            CampusPinError::Timeout(_) => FailureReason::NetworkTimeout,
            CampusPinError::Transport(_) => FailureReason::NetworkUnavailable,
            CampusPinError::RemoteRejection { status, .. } => FailureReason::Rejected(*status),
            other if other.class() == FailureClass::LocalPersistence => {
                FailureReason::LocalPersistence
            }
            other => FailureReason::Unknown(other.to_string()),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 基础延迟时间（秒）
    pub base_delay_seconds: u64,
    /// 最大延迟时间（秒）
    pub max_delay_seconds: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_seconds: 5,
            max_delay_seconds: 300, // 5分钟
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 计算第 `attempt` 次连续失败后的等待时间
    pub fn next_delay(&self, attempt: u32, reason: &FailureReason) -> Duration {
        // 基础延迟 = base_delay * (backoff_factor ^ attempt)
        let base_delay =
            self.base_delay_seconds as f64 * self.backoff_factor.powf(attempt as f64);

        let adjusted_delay = base_delay * reason.delay_multiplier();
        let capped_delay = adjusted_delay.min(self.max_delay_seconds as f64);

        let jitter = capped_delay * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_secs_f64(final_delay)
    }
}

/// 退避状态：记录连续失败次数与下一次允许重试的时刻
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    policy: RetryPolicy,
    attempts: u32,
    next_retry_at: Option<tokio::time::Instant>,
}

impl RetryBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            next_retry_at: None,
        }
    }

    /// 记录一次失败，返回本次计算出的等待时间
    pub fn record_failure(&mut self, reason: &FailureReason) -> Duration {
        let delay = self.policy.next_delay(self.attempts, reason);
        self.attempts = self.attempts.saturating_add(1);
        self.next_retry_at = Some(tokio::time::Instant::now() + delay);
        delay
    }

    /// 成功或网络恢复时重置
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_retry_at = None;
    }

    /// 当前是否允许重试
    pub fn can_retry_now(&self) -> bool {
        match self.next_retry_at {
            Some(at) => tokio::time::Instant::now() >= at,
            None => true,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
