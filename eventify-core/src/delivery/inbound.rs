//! 入站桥接（InboundRouter）
//!
//! 按 `X-Event-Type` 头选择已登记的事件类型，把 Broker 投递来的消息还原为本地信封，
//! 交由总线重新发布。还原失败时返回错误，由消费端决定拒绝或重新入队。
//!
use super::broker::{HEADER_CORRELATION_ID, HEADER_EVENT_TYPE, OutboundMessage};
use super::serializer::Serializer;
use crate::error::{EventBusError, EventBusResult};
use crate::event::{Envelope, Event, PublishContext, SerializedEnvelope};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

type DecodeFn = fn(&SerializedEnvelope, &PublishContext) -> EventBusResult<Envelope>;

fn decode_into<E: Event>(
    serialized: &SerializedEnvelope,
    context: &PublishContext,
) -> EventBusResult<Envelope> {
    Ok(Envelope::new(serialized.decode::<E>()?, context))
}

#[derive(Default)]
pub struct InboundRouter {
    decoders: DashMap<&'static str, DecodeFn>,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记可接收的事件类型；已登记时返回 `false`
    pub fn register<E: Event>(&self) -> bool {
        match self.decoders.entry(E::EVENT_TYPE) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let decode: DecodeFn = decode_into::<E>;
                entry.insert(decode);
                true
            }
        }
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// 还原一条消息
    ///
    /// 新信封的因果ID为原事件ID，关联ID优先取消息头，元数据原样保留。
    pub fn decode(
        &self,
        serializer: &dyn Serializer,
        message: &OutboundMessage,
    ) -> EventBusResult<Envelope> {
        let reject = |reason: String| EventBusError::InboundRejected {
            destination: message.destination().to_string(),
            reason,
        };

        let event_type = message
            .header(HEADER_EVENT_TYPE)
            .ok_or_else(|| reject(format!("missing {HEADER_EVENT_TYPE} header")))?;
        let decode = self
            .decoders
            .get(event_type)
            .map(|entry| *entry.value())
            .ok_or_else(|| reject(format!("unregistered event type: {event_type}")))?;

        let serialized = serializer.deserialize(message.body())?;
        let correlation_id = message
            .header(HEADER_CORRELATION_ID)
            .unwrap_or(serialized.correlation_id())
            .to_string();
        let context = PublishContext::builder()
            .correlation_id(correlation_id)
            .causation_id(serialized.event_id().to_string())
            .metadata(serialized.metadata().clone())
            .build();

        let envelope = decode(&serialized, &context)?;
        debug!(
            destination = %message.destination(),
            event_type = envelope.event_type(),
            causation_id = %serialized.event_id(),
            "inbound message decoded"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::JsonSerializer;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct RefundIssued {
        amount: u64,
    }

    impl Event for RefundIssued {
        const EVENT_TYPE: &'static str = "refund.issued";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct RefundVoided {
        reason: String,
    }

    impl Event for RefundVoided {
        const EVENT_TYPE: &'static str = "refund.voided";
    }

    fn message<E: Event>(event: E, header_type: Option<&str>) -> OutboundMessage {
        let envelope = Envelope::new(
            event,
            &PublishContext::default().with_metadata("tenant", "t-1"),
        );
        let body = JsonSerializer
            .serialize(&envelope.to_serialized().unwrap())
            .unwrap();
        let mut headers = BTreeMap::new();
        if let Some(event_type) = header_type {
            headers.insert(HEADER_EVENT_TYPE.to_string(), event_type.to_string());
        }
        OutboundMessage::builder()
            .destination("refunds")
            .routing_key("async.after_commit.refund")
            .headers(headers)
            .content_type("application/json")
            .body(body)
            .build()
    }

    #[test]
    fn decodes_registered_type_with_causation() {
        let router = InboundRouter::new();
        assert!(router.register::<RefundIssued>());
        assert!(!router.register::<RefundIssued>());
        assert!(router.is_registered("refund.issued"));

        let msg = message(RefundIssued { amount: 30 }, Some("refund.issued"));
        let original = JsonSerializer.deserialize(msg.body()).unwrap();
        let envelope = router.decode(&JsonSerializer, &msg).unwrap();

        assert_eq!(
            envelope.payload::<RefundIssued>(),
            Some(&RefundIssued { amount: 30 })
        );
        assert_eq!(envelope.causation_id(), Some(original.event_id()));
        assert_eq!(envelope.correlation_id(), original.correlation_id());
        assert_ne!(envelope.event_id(), original.event_id());
        assert_eq!(
            envelope.metadata().get("tenant").map(String::as_str),
            Some("t-1")
        );
    }

    #[test]
    fn rejects_missing_header_and_unknown_type() {
        let router = InboundRouter::new();
        router.register::<RefundIssued>();

        let err = router
            .decode(&JsonSerializer, &message(RefundIssued { amount: 1 }, None))
            .unwrap_err();
        assert!(matches!(err, EventBusError::InboundRejected { ref destination, .. } if destination == "refunds"));

        let voided = RefundVoided {
            reason: "duplicate".into(),
        };
        let err = router
            .decode(&JsonSerializer, &message(voided, Some("refund.voided")))
            .unwrap_err();
        assert!(matches!(err, EventBusError::InboundRejected { ref reason, .. } if reason.contains("refund.voided")));
    }

    #[test]
    fn header_and_body_must_agree() {
        let router = InboundRouter::new();
        router.register::<RefundIssued>();

        let voided = RefundVoided {
            reason: "typo".into(),
        };
        let err = router
            .decode(&JsonSerializer, &message(voided, Some("refund.issued")))
            .unwrap_err();
        assert!(matches!(err, EventBusError::TypeMismatch { .. }));
    }
}
