//! 投递（delivery）
//!
//! 分发器的最后一公里：
//! - `DeliverySink`：进程内直接调用（`DirectSink`）或经由 Broker 发布（`BrokerSink`）；
//! - `RetryPolicy`：Broker 投递的指数退避重试；
//! - `Broker` / `Serializer`：外部协作方能力接口，附带内存与 JSON 实现；
//! - `InboundRouter`：把 Broker 投递来的消息还原为本地信封。
//!
mod broker;
mod inbound;
mod retry;
mod serializer;
mod sink;

pub use broker::{
    Broker, BrokerError, HEADER_CORRELATION_ID, HEADER_EVENT_ID, HEADER_EVENT_SOURCE,
    HEADER_EVENT_TIMESTAMP, HEADER_EVENT_TYPE, HEADER_TRANSACTION_PHASE, InMemoryBroker,
    OutboundMessage,
};
pub use inbound::InboundRouter;
pub use retry::RetryPolicy;
pub use serializer::{JsonSerializer, Serializer};
pub use sink::{BrokerChannel, BrokerSink, DeliveryAttempt, DeliveryReceipt, DeliverySink, DirectSink};
