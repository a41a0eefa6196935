use super::event_trait::{ErasedPayload, Event};
use super::publish_context::PublishContext;
use super::serialized_envelope::SerializedEnvelope;
use crate::error::EventBusResult;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// 事件信封，包含事件载荷与发布时刻的元数据
///
/// 创建后不可变；在事务缓冲区与分发器之间以 `Arc<Envelope>` 共享。
#[derive(Debug, Clone)]
pub struct Envelope {
    event_id: String,
    event_type: &'static str,
    correlation_id: String,
    causation_id: Option<String>,
    created_at: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
    payload: Arc<dyn ErasedPayload>,
}

impl Envelope {
    pub fn new<E: Event>(payload: E, context: &PublishContext) -> Self {
        let event_id = Uuid::new_v4().to_string();
        let correlation_id = context
            .correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| event_id.clone());

        Self {
            event_id,
            event_type: E::EVENT_TYPE,
            correlation_id,
            causation_id: context.causation_id().map(str::to_string),
            created_at: Utc::now(),
            metadata: context.metadata().clone(),
            payload: Arc::new(payload),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// 还原为具体事件类型；类型不符时返回 `None`
    pub fn payload<E: Event>(&self) -> Option<&E> {
        self.payload.as_any().downcast_ref::<E>()
    }

    /// 转换为传输形态（载荷序列化为 JSON 值）
    pub fn to_serialized(&self) -> EventBusResult<SerializedEnvelope> {
        Ok(SerializedEnvelope::builder()
            .event_id(self.event_id.clone())
            .event_type(self.event_type.to_string())
            .correlation_id(self.correlation_id.clone())
            .maybe_causation_id(self.causation_id.clone())
            .created_at(self.created_at)
            .metadata(self.metadata.clone())
            .payload(self.payload.to_value()?)
            .build())
    }
}
