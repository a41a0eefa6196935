//! 事务感知事件总线（eventify-core）
//!
//! 将事件发布绑定到外部事务的生命周期上，监听器可以选择在以下时机执行：
//! - `IMMEDIATE`：发布时立即执行，与事务无关；
//! - `BEFORE_COMMIT`：提交前同步执行，失败可否决提交；
//! - `AFTER_COMMIT` / `AFTER_ROLLBACK`：提交成功或回滚之后执行；
//! - `AFTER_COMPLETION`：无论结果如何，事务结束后执行。
//!
//! 本 crate 只消费事务管理器、消息代理与序列化器的能力接口（`transaction`、`delivery`），
//! 不负责管理事务本身，也不实现分布式两阶段提交或持久化 Outbox。
//!
//! 组件（由底向上）：
//! - 事件与信封（`event`）
//! - 监听器注册表（`listener`）
//! - 事务上下文追踪器（`transaction`）
//! - 阶段调度器、分发器、上报与幂等（`eventing`）
//! - 投递通道与重试（`delivery`）
//! - 对外门面 `EventBus`（`bus`）
//!
//! 典型用法：
//! 1. 使用 `EventBus::builder()` 注入事务管理器（以及可选的 Broker）；
//! 2. 通过 `subscribe` 按事件类型与阶段注册监听器；
//! 3. 在事务作用域内 `publish`，由事务回调驱动各阶段的释放。
//!
pub mod bus;
pub mod delivery;
pub mod error;
pub mod event;
pub mod eventing;
pub mod listener;
pub mod transaction;

pub use bus::{EventBus, EventBusConfig, Published};
pub use delivery::RetryPolicy;
pub use error::{EventBusError, EventBusResult};
pub use event::{Envelope, Event, PublishContext};
pub use eventing::CompletionMode;
pub use listener::{
    EventHandler, HandlerFn, ListenerContext, ListenerOptions, RegistrationHandle,
    TransactionPhase,
};
pub use transaction::{LifecycleSignal, TransactionId, TransactionManager, TransactionStatus};

// 允许在本 crate 内部通过 ::eventify_core 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::eventify_core 路径。
extern crate self as eventify_core;
