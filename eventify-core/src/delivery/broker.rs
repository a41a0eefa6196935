//! 消息代理（Broker）能力
//!
//! 本 crate 只依赖 `publish(destination, message)` 契约，消息体对本 crate 而言是不透明字节。
//! `InMemoryBroker` 记录所有发布并可脚本化失败，用于测试与示例。
//!
use async_trait::async_trait;
use bon::Builder;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub const HEADER_EVENT_ID: &str = "X-Event-ID";
pub const HEADER_EVENT_TIMESTAMP: &str = "X-Event-Timestamp";
pub const HEADER_EVENT_TYPE: &str = "X-Event-Type";
pub const HEADER_CORRELATION_ID: &str = "X-Correlation-ID";
pub const HEADER_TRANSACTION_PHASE: &str = "X-Transaction-Phase";
pub const HEADER_EVENT_SOURCE: &str = "X-Event-Source";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// 可重试
    #[error("transient broker error: {0}")]
    Transient(String),
    /// 不可重试，立即终止重试循环
    #[error("permanent broker error: {0}")]
    Permanent(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }
}

/// 待发布的消息
#[derive(Debug, Clone, Builder)]
pub struct OutboundMessage {
    #[builder(into)]
    destination: String,
    #[builder(into)]
    routing_key: String,
    #[builder(default)]
    headers: BTreeMap<String, String>,
    content_type: &'static str,
    body: Vec<u8>,
}

impl OutboundMessage {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, destination: &str, message: &OutboundMessage) -> Result<(), BrokerError>;
}

#[derive(Default)]
pub struct InMemoryBroker {
    published: Mutex<Vec<OutboundMessage>>,
    scripted: Mutex<VecDeque<BrokerError>>,
    latency: Mutex<Option<Duration>>,
    attempts: AtomicU32,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 `times` 次发布以 `error` 失败
    pub fn fail_next(&self, times: usize, error: BrokerError) {
        let mut scripted = lock(&self.scripted);
        scripted.extend(std::iter::repeat_n(error, times));
    }

    /// 为每次发布增加固定延迟
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// 成功发布的全部消息（按发布顺序）
    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.published).clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<OutboundMessage> {
        lock(&self.published)
            .iter()
            .filter(|m| m.destination() == destination)
            .cloned()
            .collect()
    }

    /// 发布调用次数（含失败）
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, destination: &str, message: &OutboundMessage) -> Result<(), BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = lock(&self.scripted).pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        let mut message = message.clone();
        message.destination = destination.to_string();
        lock(&self.published).push(message);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
