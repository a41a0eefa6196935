//! 事件处理器（EventHandler）
//!
//! 定义进程内监听器的处理逻辑与名称，并在注册时擦除为统一的闭包形态，
//! 以便注册表按事件类型存放不同载荷类型的监听器。
//!
use crate::event::{Envelope, Event};
use crate::listener::TransactionPhase;
use crate::transaction::TransactionId;
use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// 监听器调用上下文：被释放的信封、所处阶段与所属事务
#[derive(Debug, Clone)]
pub struct ListenerContext {
    envelope: Arc<Envelope>,
    phase: TransactionPhase,
    transaction_id: Option<TransactionId>,
}

impl ListenerContext {
    pub fn new(
        envelope: Arc<Envelope>,
        phase: TransactionPhase,
        transaction_id: Option<TransactionId>,
    ) -> Self {
        Self {
            envelope,
            phase,
            transaction_id,
        }
    }

    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn event_id(&self) -> &str {
        self.envelope.event_id()
    }

    pub fn correlation_id(&self) -> &str {
        self.envelope.correlation_id()
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// 处理器名称（用于重复注册判定、失败上报与幂等记录）
    fn handler_name(&self) -> &str;

    /// 处理事件
    async fn handle(&self, event: &E, ctx: &ListenerContext) -> anyhow::Result<()>;
}

/// 以异步闭包实现的处理器
pub struct HandlerFn<F> {
    name: String,
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for HandlerFn<F>
where
    E: Event,
    F: Fn(E, ListenerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &E, ctx: &ListenerContext) -> anyhow::Result<()> {
        (self.f)(event.clone(), ctx.clone()).await
    }
}

pub(crate) type HandlerFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

/// 类型擦除后的处理器闭包
pub(crate) type ErasedHandler =
    Arc<dyn for<'a> Fn(&'a ListenerContext) -> HandlerFuture<'a> + Send + Sync>;

pub(crate) fn erase_handler<E, H>(handler: Arc<H>) -> ErasedHandler
where
    E: Event,
    H: EventHandler<E> + 'static,
{
    Arc::new(move |ctx| {
        let handler = handler.clone();

        Box::pin(async move {
            // 注册表以事件类型为键，正常情况下这里的 downcast 不会失败
            let Some(event) = ctx.envelope().payload::<E>() else {
                return Err(anyhow!(
                    "payload type mismatch: expected={}, found={}",
                    E::EVENT_TYPE,
                    ctx.envelope().event_type()
                ));
            };
            handler.handle(event, ctx).await
        })
    })
}
