//! 监听器（listener）
//!
//! - `TransactionPhase`：监听器期望执行的事务阶段；
//! - `EventHandler`：进程内监听器的处理逻辑与名称；
//! - `ListenerRegistry`：按事件类型维护有序的监听器登记，支持并发注册/注销与快照式查找。
//!
mod handler;
mod phase;
mod registry;

pub use handler::{EventHandler, HandlerFn, ListenerContext};
pub(crate) use handler::{ErasedHandler, erase_handler};
pub use phase::TransactionPhase;
pub use registry::{
    ListenerOptions, ListenerRegistration, ListenerRegistry, ListenerTarget, RegistrationHandle,
};
