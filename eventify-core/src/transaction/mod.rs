//! 事务（transaction）
//!
//! 本 crate 不管理事务，只消费外部事务管理器的生命周期通知能力：
//! - `TransactionManager`：查询当前事务、注册提交前/完成后回调；
//! - `TransactionContextTracker`：按事务ID维护待释放的事件缓冲区及其状态机；
//! - `InMemoryTransactionManager`：可按需触发信号的内存实现，用于测试与示例。
//!
mod in_memory;
mod manager;
mod tracker;

pub use in_memory::{InMemoryTransactionManager, TransactionError};
pub use manager::{
    AfterCompletionCallback, BeforeCommitCallback, NoTransactionManager, TransactionId,
    TransactionManager, TransactionStatus,
};
pub use tracker::{
    BufferState, LifecycleSignal, Release, TransactionBuffer, TransactionContextTracker,
};
