use serde::{Deserialize, Serialize};
use std::fmt;

/// 事务阶段：监听器有资格被调用的生命周期时点
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPhase {
    /// 发布时立即执行，不进入缓冲区
    Immediate,
    /// 提交前同步执行，失败可否决提交
    BeforeCommit,
    /// 提交成功后执行
    AfterCommit,
    /// 回滚后执行
    AfterRollback,
    /// 事务结束后执行（提交或回滚均会触发）
    AfterCompletion,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPhase::Immediate => "IMMEDIATE",
            TransactionPhase::BeforeCommit => "BEFORE_COMMIT",
            TransactionPhase::AfterCommit => "AFTER_COMMIT",
            TransactionPhase::AfterRollback => "AFTER_ROLLBACK",
            TransactionPhase::AfterCompletion => "AFTER_COMPLETION",
        }
    }

    /// Broker 路由键中使用的小写片段
    pub fn routing_segment(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    /// 是否为提交相关阶段
    pub fn is_commit_phase(&self) -> bool {
        matches!(
            self,
            TransactionPhase::BeforeCommit | TransactionPhase::AfterCommit
        )
    }

    /// 是否需要进入事务缓冲区
    pub fn is_buffered(&self) -> bool {
        !matches!(self, TransactionPhase::Immediate)
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_phases() {
        assert!(TransactionPhase::BeforeCommit.is_commit_phase());
        assert!(TransactionPhase::AfterCommit.is_commit_phase());
        assert!(!TransactionPhase::AfterRollback.is_commit_phase());
        assert!(!TransactionPhase::AfterCompletion.is_commit_phase());
        assert!(!TransactionPhase::Immediate.is_commit_phase());
    }

    #[test]
    fn display_and_routing() {
        assert_eq!(TransactionPhase::AfterRollback.to_string(), "AFTER_ROLLBACK");
        assert_eq!(
            TransactionPhase::BeforeCommit.routing_segment(),
            "before_commit"
        );
        let json = serde_json::to_string(&TransactionPhase::AfterCompletion).unwrap();
        assert_eq!(json, "\"AFTER_COMPLETION\"");
    }
}
