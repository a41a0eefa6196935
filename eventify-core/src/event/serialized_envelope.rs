//! 信封的传输形态（SerializedEnvelope）
//!
//! 外部投递（Broker）与序列化器之间交换的标准结构，载荷以 JSON 值保存，
//! 消费端可通过 `decode` 还原为具体事件类型。
//!
use super::event_trait::Event;
use crate::error::{EventBusError, EventBusResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct SerializedEnvelope {
    /// 事件唯一标识符
    event_id: String,
    /// 事件类型，用于路由与反序列化校验
    event_type: String,
    /// 关联 ID，用于将多个事件关联到同一个业务操作
    correlation_id: String,
    /// 因果 ID，用于表示事件的触发来源
    causation_id: Option<String>,
    /// 事件发布时间
    created_at: DateTime<Utc>,
    /// 附加元数据
    #[builder(default)]
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    /// 事件负载
    payload: Value,
}

impl SerializedEnvelope {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
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

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// 还原具体事件载荷，事件类型必须一致
    pub fn decode<E: Event>(&self) -> EventBusResult<E> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventBusError::TypeMismatch {
                expected: E::EVENT_TYPE.to_string(),
                found: self.event_type.clone(),
            });
        }

        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
