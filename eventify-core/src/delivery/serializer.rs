use crate::error::EventBusResult;
use crate::event::SerializedEnvelope;

/// 序列化能力：信封与字节之间的转换
pub trait Serializer: Send + Sync {
    fn serialize(&self, envelope: &SerializedEnvelope) -> EventBusResult<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> EventBusResult<SerializedEnvelope>;

    /// 写入消息的 content-type
    fn content_type(&self) -> &'static str;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, envelope: &SerializedEnvelope) -> EventBusResult<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> EventBusResult<SerializedEnvelope> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
