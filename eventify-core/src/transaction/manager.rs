use crate::error::{EventBusError, EventBusResult};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// 事务标识（由外部事务管理器分配）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(Arc<str>);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    /// 生成一个随机事务ID
    pub fn generate() -> Self {
        Self::new(format!("tx-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// 事务终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Committed,
    RolledBack,
}

/// 提交前回调：返回错误即否决提交
pub type BeforeCommitCallback = Box<dyn FnOnce() -> BoxFuture<'static, EventBusResult<()>> + Send>;

/// 完成后回调：携带事务终态
pub type AfterCompletionCallback =
    Box<dyn FnOnce(TransactionStatus) -> BoxFuture<'static, ()> + Send>;

/// 事务管理器能力
///
/// 实现方需保证：
/// - 提交前回调在物理提交之前按注册顺序执行，任一失败则不得提交；
/// - 完成后回调在提交或回滚之后恰好执行一次。
pub trait TransactionManager: Send + Sync {
    /// 当前执行上下文中的活动事务
    fn current_transaction_id(&self) -> Option<TransactionId>;

    /// 是否支持注册生命周期回调
    ///
    /// 返回 `false` 的宿主自行通过 `EventBus::signal` 推送生命周期信号，
    /// 发布时只缓冲事件，不尝试注册回调。
    fn supports_callbacks(&self) -> bool {
        true
    }

    fn register_before_commit(
        &self,
        transaction_id: &TransactionId,
        callback: BeforeCommitCallback,
    ) -> EventBusResult<()>;

    fn register_after_completion(
        &self,
        transaction_id: &TransactionId,
        callback: AfterCompletionCallback,
    ) -> EventBusResult<()>;
}

/// 无事务环境：所有发布均按非事务处理
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransactionManager;

impl TransactionManager for NoTransactionManager {
    fn current_transaction_id(&self) -> Option<TransactionId> {
        None
    }

    fn supports_callbacks(&self) -> bool {
        false
    }

    fn register_before_commit(
        &self,
        transaction_id: &TransactionId,
        _callback: BeforeCommitCallback,
    ) -> EventBusResult<()> {
        Err(EventBusError::TransactionManager {
            reason: format!("no transaction support: transaction={transaction_id}"),
        })
    }

    fn register_after_completion(
        &self,
        transaction_id: &TransactionId,
        _callback: AfterCompletionCallback,
    ) -> EventBusResult<()> {
        Err(EventBusError::TransactionManager {
            reason: format!("no transaction support: transaction={transaction_id}"),
        })
    }
}
