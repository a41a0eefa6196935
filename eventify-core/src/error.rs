//! 事件总线统一错误定义
//!
//! 覆盖注册、事务生命周期、监听器分发与外部投递（含入站消息）四类错误，
//! 便于调用方与上报组件统一处理 `EventBusError`。
//!
use crate::listener::TransactionPhase;
use crate::transaction::{BufferState, LifecycleSignal, TransactionId};
use thiserror::Error;

/// 统一错误类型
///
/// 需要 `Clone`：同一批失败可能同时交给多个上报者（日志、内存观察者等）。
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    // --- 注册 ---
    #[error("duplicate registration: event_type={event_type}, listener={listener}, phase={phase}")]
    DuplicateRegistration {
        event_type: &'static str,
        listener: String,
        phase: TransactionPhase,
    },

    // --- 事务生命周期 ---
    #[error(
        "invalid lifecycle transition: transaction={transaction_id}, state={state:?}, signal={signal:?}"
    )]
    InvalidLifecycleTransition {
        transaction_id: TransactionId,
        state: BufferState,
        signal: LifecycleSignal,
    },
    #[error("transaction manager error: {reason}")]
    TransactionManager { reason: String },

    // --- 分发/投递 ---
    #[error(
        "listener failure: listener={listener}, event_type={event_type}, event_id={event_id}, phase={phase}, reason={reason}"
    )]
    ListenerFailure {
        listener: String,
        event_type: &'static str,
        event_id: String,
        phase: TransactionPhase,
        reason: String,
    },
    #[error(
        "delivery failed: listener={listener}, destination={destination}, attempts={attempts}, last_error={last_error}"
    )]
    DeliveryFailed {
        listener: String,
        destination: String,
        attempts: u32,
        last_error: String,
    },
    #[error("broker not configured: listener={listener} requires durable delivery")]
    BrokerNotConfigured { listener: String },
    #[error("inbound message rejected: destination={destination}, reason={reason}")]
    InboundRejected { destination: String, reason: String },

    // --- 序列化 ---
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },
}

/// 统一 Result 类型别名
pub type EventBusResult<T> = Result<T, EventBusError>;

impl From<serde_json::Error> for EventBusError {
    fn from(err: serde_json::Error) -> Self {
        EventBusError::Serialization {
            reason: err.to_string(),
        }
    }
}
