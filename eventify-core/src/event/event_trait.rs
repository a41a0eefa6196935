use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::fmt;

/// 事件载荷需要满足的通用能力边界
///
/// 事件一经发布即不可变，总线只在其外层附加信封字段。
pub trait Event: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 事件类型（注册表与 Broker 路由使用的稳定名称，不随重构变化）
    const EVENT_TYPE: &'static str;
}

/// 类型擦除后的事件载荷，供信封在不同监听器之间共享
pub trait ErasedPayload: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn event_type(&self) -> &'static str;

    fn to_value(&self) -> serde_json::Result<Value>;
}

impl<E: Event> ErasedPayload for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
