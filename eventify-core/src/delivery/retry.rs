use bon::Builder;
use std::time::Duration;

/// Broker 投递的重试策略
///
/// 第 n 次失败后等待 `min(initial_backoff * 2^(n-1), max_backoff)` 再发起第 n+1 次尝试。
#[derive(Builder, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次），至少为 1
    #[builder(default = 3)]
    max_attempts: u32,
    #[builder(default = Duration::from_millis(50))]
    initial_backoff: Duration,
    #[builder(default = Duration::from_secs(2))]
    max_backoff: Duration,
    /// 单次尝试超时，超时按瞬时失败处理
    attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时长
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}
