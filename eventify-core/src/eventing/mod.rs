//! 事件调度子系统（eventing）
//!
//! 将事务生命周期信号转换为监听器调用：
//! - `PhaseScheduler`：按信号释放缓冲区中的信封；
//! - `Dispatcher`：逐个监听器隔离地调用，选择投递通道，处理幂等；
//! - `CompletionWorker`：承载 AFTER_* 阶段的后台任务；
//! - `DispatchReporter`：批量失败的上报协作方；
//! - `ProcessedEventStore`：幂等监听器的已处理记录。
//!
pub mod dispatcher;
pub mod idempotency;
pub mod reporter;
pub mod scheduler;
pub mod worker;

pub use dispatcher::{DispatchFailure, DispatchOutcome, DispatchReport, DispatchResult, Dispatcher};
pub use idempotency::{InMemoryProcessedEventStore, ProcessedEventStore};
pub use reporter::{DispatchReporter, FailureBatch, InMemoryReporter, TracingReporter};
pub use scheduler::PhaseScheduler;
pub use worker::{CompletionMode, CompletionWorker};
