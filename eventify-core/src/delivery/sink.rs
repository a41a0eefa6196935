//! 投递通道（DeliverySink）
//!
//! 由监听器配置选择的封闭变体集合：
//! - `Direct`：进程内调用处理器，结果原样向上传递；
//! - `Broker`：序列化信封后发布到目的地，瞬时失败按 `RetryPolicy` 重试。
//!
use super::broker::{
    Broker, BrokerError, HEADER_CORRELATION_ID, HEADER_EVENT_ID, HEADER_EVENT_SOURCE,
    HEADER_EVENT_TIMESTAMP, HEADER_EVENT_TYPE, HEADER_TRANSACTION_PHASE, OutboundMessage,
};
use super::retry::RetryPolicy;
use super::serializer::Serializer;
use crate::error::{EventBusError, EventBusResult};
use crate::listener::{ErasedHandler, ListenerContext};
use bon::Builder;
use std::sync::Arc;
use tracing::{debug, warn};

/// 成功投递的回执
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    attempts: u32,
}

impl DeliveryReceipt {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// 单次重试循环的进度，循环结束即丢弃
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    listener: String,
    attempt_count: u32,
    last_error: Option<String>,
}

impl DeliveryAttempt {
    fn new(listener: &str) -> Self {
        Self {
            listener: listener.to_string(),
            attempt_count: 0,
            last_error: None,
        }
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

pub enum DeliverySink {
    Direct(DirectSink),
    Broker(BrokerSink),
}

impl DeliverySink {
    pub async fn send(&self, ctx: &ListenerContext) -> EventBusResult<DeliveryReceipt> {
        match self {
            DeliverySink::Direct(sink) => sink.send(ctx).await,
            DeliverySink::Broker(sink) => sink.send(ctx).await,
        }
    }
}

pub struct DirectSink {
    listener: String,
    handler: ErasedHandler,
}

impl DirectSink {
    pub(crate) fn new(listener: impl Into<String>, handler: ErasedHandler) -> Self {
        Self {
            listener: listener.into(),
            handler,
        }
    }

    pub async fn send(&self, ctx: &ListenerContext) -> EventBusResult<DeliveryReceipt> {
        (self.handler)(ctx)
            .await
            .map_err(|err| EventBusError::ListenerFailure {
                listener: self.listener.clone(),
                event_type: ctx.envelope().event_type(),
                event_id: ctx.event_id().to_string(),
                phase: ctx.phase(),
                reason: format!("{err:#}"),
            })?;
        Ok(DeliveryReceipt { attempts: 1 })
    }
}

/// Broker 投递共享的协作方与配置
#[derive(Builder)]
pub struct BrokerChannel {
    broker: Arc<dyn Broker>,
    serializer: Arc<dyn Serializer>,
    #[builder(default)]
    retry: RetryPolicy,
    /// 写入 `X-Event-Source` 头
    #[builder(into)]
    source: Option<String>,
}

impl BrokerChannel {
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

pub struct BrokerSink {
    channel: Arc<BrokerChannel>,
    listener: String,
    destination: String,
}

impl BrokerSink {
    pub fn new(
        channel: Arc<BrokerChannel>,
        listener: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            listener: listener.into(),
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// 构建待发布的消息
    pub fn message(&self, ctx: &ListenerContext) -> EventBusResult<OutboundMessage> {
        let envelope = ctx.envelope();
        let body = self
            .channel
            .serializer
            .serialize(&envelope.to_serialized()?)?;

        // 发布上下文中的元数据先写入，标准头覆盖同名条目
        let mut headers = envelope.metadata().clone();
        headers.insert(HEADER_EVENT_ID.to_string(), envelope.event_id().to_string());
        headers.insert(
            HEADER_EVENT_TIMESTAMP.to_string(),
            envelope.created_at().to_rfc3339(),
        );
        headers.insert(
            HEADER_EVENT_TYPE.to_string(),
            envelope.event_type().to_string(),
        );
        headers.insert(
            HEADER_CORRELATION_ID.to_string(),
            envelope.correlation_id().to_string(),
        );
        headers.insert(
            HEADER_TRANSACTION_PHASE.to_string(),
            ctx.phase().to_string(),
        );
        if let Some(source) = self.channel.source() {
            headers.insert(HEADER_EVENT_SOURCE.to_string(), source.to_string());
        }

        Ok(OutboundMessage::builder()
            .destination(self.destination.as_str())
            .routing_key(format!(
                "async.{}.{}",
                ctx.phase().routing_segment(),
                envelope.event_type()
            ))
            .headers(headers)
            .content_type(self.channel.serializer.content_type())
            .body(body)
            .build())
    }

    pub async fn send(&self, ctx: &ListenerContext) -> EventBusResult<DeliveryReceipt> {
        let message = self.message(ctx)?;
        let policy = self.channel.retry;
        let mut attempt = DeliveryAttempt::new(&self.listener);

        loop {
            attempt.attempt_count += 1;

            let result = match policy.attempt_timeout() {
                Some(limit) => tokio::time::timeout(
                    limit,
                    self.channel.broker.publish(&self.destination, &message),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(BrokerError::Transient(format!(
                        "attempt timed out after {limit:?}"
                    )))
                }),
                None => {
                    self.channel
                        .broker
                        .publish(&self.destination, &message)
                        .await
                }
            };

            let err = match result {
                Ok(()) => {
                    debug!(
                        listener = %attempt.listener,
                        destination = %self.destination,
                        event_id = %ctx.event_id(),
                        attempts = attempt.attempt_count,
                        "broker delivery succeeded"
                    );
                    return Ok(DeliveryReceipt {
                        attempts: attempt.attempt_count,
                    });
                }
                Err(err) => err,
            };

            let retryable = err.is_transient();
            attempt.last_error = Some(err.to_string());

            if !retryable || attempt.attempt_count >= policy.max_attempts() {
                warn!(
                    listener = %attempt.listener,
                    destination = %self.destination,
                    event_id = %ctx.event_id(),
                    attempts = attempt.attempt_count,
                    error = %err,
                    "broker delivery failed"
                );
                return Err(EventBusError::DeliveryFailed {
                    listener: attempt.listener,
                    destination: self.destination.clone(),
                    attempts: attempt.attempt_count,
                    last_error: err.to_string(),
                });
            }

            let delay = policy.backoff(attempt.attempt_count);
            debug!(
                listener = %attempt.listener,
                destination = %self.destination,
                attempt = attempt.attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "broker delivery retry scheduled"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
