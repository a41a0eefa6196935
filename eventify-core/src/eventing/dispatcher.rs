//! 分发器（Dispatcher）
//!
//! 为一次 (信封, 监听器) 调用选择投递通道并执行：
//! - 进程内监听器走 `DirectSink`，Broker 监听器走 `BrokerSink`；
//! - 处理器返回错误或 panic 都转换为 `ListenerFailure`，不影响其他监听器；
//! - 幂等监听器先查询处理记录，成功后再写入。
//!
use super::idempotency::ProcessedEventStore;
use crate::delivery::{BrokerChannel, BrokerSink, DeliverySink, DirectSink};
use crate::error::EventBusError;
use crate::event::Envelope;
use crate::listener::{ListenerContext, ListenerRegistration, ListenerTarget, TransactionPhase};
use crate::transaction::TransactionId;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { attempts: u32 },
    /// 幂等监听器已处理过该事件
    Skipped,
}

/// 单个监听器的失败记录
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    listener: String,
    event_id: String,
    phase: TransactionPhase,
    error: EventBusError,
}

impl DispatchFailure {
    fn new(
        registration: &ListenerRegistration,
        envelope: &Envelope,
        phase: TransactionPhase,
        error: EventBusError,
    ) -> Self {
        Self {
            listener: registration.listener_name().to_string(),
            event_id: envelope.event_id().to_string(),
            phase,
            error,
        }
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn error(&self) -> &EventBusError {
        &self.error
    }

    pub fn into_error(self) -> EventBusError {
        self.error
    }
}

pub type DispatchResult = Result<DispatchOutcome, DispatchFailure>;

/// 一批分发的汇总
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    delivered: usize,
    skipped: usize,
    failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn failures(&self) -> &[DispatchFailure] {
        &self.failures
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, result: DispatchResult) {
        match result {
            Ok(DispatchOutcome::Delivered { .. }) => self.delivered += 1,
            Ok(DispatchOutcome::Skipped) => self.skipped += 1,
            Err(failure) => self.failures.push(failure),
        }
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

pub struct Dispatcher {
    broker: Option<Arc<BrokerChannel>>,
    processed: Arc<dyn ProcessedEventStore>,
}

impl Dispatcher {
    pub fn new(broker: Option<Arc<BrokerChannel>>, processed: Arc<dyn ProcessedEventStore>) -> Self {
        Self { broker, processed }
    }

    pub fn has_broker(&self) -> bool {
        self.broker.is_some()
    }

    pub async fn dispatch(
        &self,
        envelope: &Arc<Envelope>,
        registration: &ListenerRegistration,
        phase: TransactionPhase,
        transaction_id: Option<&TransactionId>,
    ) -> DispatchResult {
        let fail = |error| DispatchFailure::new(registration, envelope, phase, error);
        let listener = registration.listener_name();

        if registration.is_idempotent()
            && self
                .processed
                .is_processed(listener, envelope.event_id())
                .await
                .map_err(fail)?
        {
            debug!(
                listener = %listener,
                event_id = %envelope.event_id(),
                "event already processed, skipped"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        let sink = self.sink_for(registration).map_err(fail)?;
        let ctx = ListenerContext::new(envelope.clone(), phase, transaction_id.cloned());

        let receipt = match AssertUnwindSafe(sink.send(&ctx)).catch_unwind().await {
            Ok(result) => result.map_err(fail)?,
            Err(panic) => {
                return Err(fail(EventBusError::ListenerFailure {
                    listener: listener.to_string(),
                    event_type: envelope.event_type(),
                    event_id: envelope.event_id().to_string(),
                    phase,
                    reason: format!("listener panicked: {}", panic_message(panic.as_ref())),
                }));
            }
        };

        if registration.is_idempotent() {
            self.processed
                .mark_processed(listener, envelope.event_id())
                .await
                .map_err(fail)?;
        }

        debug!(
            listener = %listener,
            event_type = envelope.event_type(),
            event_id = %envelope.event_id(),
            phase = %phase,
            attempts = receipt.attempts(),
            "listener invoked"
        );
        Ok(DispatchOutcome::Delivered {
            attempts: receipt.attempts(),
        })
    }

    fn sink_for(&self, registration: &ListenerRegistration) -> Result<DeliverySink, EventBusError> {
        match registration.target() {
            ListenerTarget::InProcess(handler) => Ok(DeliverySink::Direct(DirectSink::new(
                registration.listener_name(),
                handler.clone(),
            ))),
            ListenerTarget::Broker { destination } => {
                let channel =
                    self.broker
                        .clone()
                        .ok_or_else(|| EventBusError::BrokerNotConfigured {
                            listener: registration.listener_name().to_string(),
                        })?;
                Ok(DeliverySink::Broker(BrokerSink::new(
                    channel,
                    registration.listener_name(),
                    destination.as_str(),
                )))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
