//! 事件（Event）与事件信封
//!
//! 定义事件载荷需要实现的最小接口（`Event`），以及将事件与元数据封装后的
//! 不可变信封 `Envelope`、发布上下文 `PublishContext` 与传输形态 `SerializedEnvelope`。

mod envelope;
mod event_trait;
mod publish_context;
mod serialized_envelope;

pub use envelope::Envelope;
pub use event_trait::{ErasedPayload, Event};
pub use publish_context::PublishContext;
pub use serialized_envelope::SerializedEnvelope;
