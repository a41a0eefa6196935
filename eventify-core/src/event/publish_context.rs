use bon::Builder;
use std::collections::BTreeMap;

/// 发布上下文：调用方在发布时附加的关联信息
#[derive(Builder, Default, Debug, Clone)]
pub struct PublishContext {
    /// 关联ID（缺省时使用事件ID）
    correlation_id: Option<String>,
    /// 因果ID
    causation_id: Option<String>,
    /// 附加元数据，随信封透传到 Broker 消息头
    #[builder(default)]
    metadata: BTreeMap<String, String>,
}

impl PublishContext {
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
