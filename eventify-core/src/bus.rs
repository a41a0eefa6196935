//! 事件总线门面（EventBus）
//!
//! 面向应用代码的入口：发布事件、按阶段订阅监听器、驱动/观察事务生命周期，
//! 以及把 Broker 投递来的消息重新发布到本地。
//! 注册表、追踪器与调度器都归属于总线实例本身，多个总线实例之间互不影响。
//!
use crate::delivery::{
    Broker, BrokerChannel, InboundRouter, JsonSerializer, OutboundMessage, RetryPolicy, Serializer,
};
use crate::error::{EventBusError, EventBusResult};
use crate::event::{Envelope, Event, PublishContext};
use crate::eventing::{
    CompletionMode, CompletionWorker, DispatchReport, DispatchReporter, Dispatcher,
    InMemoryProcessedEventStore, PhaseScheduler, ProcessedEventStore, TracingReporter,
};
use crate::listener::{
    EventHandler, ListenerOptions, ListenerRegistry, ListenerTarget, RegistrationHandle,
    TransactionPhase, erase_handler,
};
use crate::transaction::{
    LifecycleSignal, TransactionContextTracker, TransactionId, TransactionManager,
};
use bon::{Builder, bon};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 总线配置
#[derive(Builder, Debug, Clone)]
pub struct EventBusConfig {
    /// AFTER_* 阶段的执行方式
    #[builder(default)]
    completion_mode: CompletionMode,
    /// Broker 投递的重试策略
    #[builder(default)]
    retry: RetryPolicy,
    /// 幂等记录的保留时长
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    idempotency_retention: Duration,
    /// 写入 `X-Event-Source` 头的来源标识
    #[builder(into)]
    source: Option<String>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig::builder().build()
    }
}

impl EventBusConfig {
    pub fn completion_mode(&self) -> CompletionMode {
        self.completion_mode
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn idempotency_retention(&self) -> Duration {
        self.idempotency_retention
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

/// 发布结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    event_id: String,
    correlation_id: String,
    transaction_id: Option<TransactionId>,
}

impl Published {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// 事件被缓冲到的事务；`None` 表示非事务发布
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn is_buffered(&self) -> bool {
        self.transaction_id.is_some()
    }
}

struct EventBusInner {
    registry: Arc<ListenerRegistry>,
    tracker: Arc<TransactionContextTracker>,
    scheduler: Arc<PhaseScheduler>,
    processed: Arc<dyn ProcessedEventStore>,
    worker: CompletionWorker,
    broker_enabled: bool,
    inbound: InboundRouter,
    serializer: Arc<dyn Serializer>,
    config: EventBusConfig,
}

/// 事务感知的事件总线（可廉价克隆的句柄）
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[bon]
impl EventBus {
    #[builder]
    pub fn new(
        transaction_manager: Arc<dyn TransactionManager>,
        broker: Option<Arc<dyn Broker>>,
        #[builder(default = Arc::new(JsonSerializer))] serializer: Arc<dyn Serializer>,
        #[builder(default = Arc::new(TracingReporter))] reporter: Arc<dyn DispatchReporter>,
        #[builder(default = Arc::new(InMemoryProcessedEventStore::new()))]
        processed_events: Arc<dyn ProcessedEventStore>,
        #[builder(default)] config: EventBusConfig,
    ) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let tracker = Arc::new(TransactionContextTracker::new(
            transaction_manager.clone(),
        ));
        let worker = CompletionWorker::new();
        let broker_enabled = broker.is_some();

        let channel = broker.map(|broker| {
            Arc::new(
                BrokerChannel::builder()
                    .broker(broker)
                    .serializer(serializer.clone())
                    .retry(config.retry)
                    .maybe_source(config.source.clone())
                    .build(),
            )
        });

        let scheduler = Arc::new(
            PhaseScheduler::builder()
                .registry(registry.clone())
                .tracker(tracker.clone())
                .manager(transaction_manager)
                .dispatcher(Dispatcher::new(channel, processed_events.clone()))
                .reporter(reporter)
                .worker(worker.clone())
                .mode(config.completion_mode)
                .build(),
        );

        Self {
            inner: Arc::new(EventBusInner {
                registry,
                tracker,
                scheduler,
                processed: processed_events,
                worker,
                broker_enabled,
                inbound: InboundRouter::new(),
                serializer,
                config,
            }),
        }
    }
}

impl EventBus {
    /// 发布事件
    ///
    /// 处于事务中时只执行 IMMEDIATE 监听器并缓冲事件，其余阶段由事务信号驱动；
    /// 否则只有 IMMEDIATE 监听器会被调用。监听器失败只通过上报协作方可见。
    pub async fn publish<E: Event>(&self, event: E) -> EventBusResult<Published> {
        self.publish_with(event, PublishContext::default()).await
    }

    pub async fn publish_with<E: Event>(
        &self,
        event: E,
        context: PublishContext,
    ) -> EventBusResult<Published> {
        self.publish_envelope(Arc::new(Envelope::new(event, &context)))
            .await
    }

    async fn publish_envelope(&self, envelope: Arc<Envelope>) -> EventBusResult<Published> {
        let event_id = envelope.event_id().to_string();
        let correlation_id = envelope.correlation_id().to_string();

        let transaction_id = self.inner.scheduler.publish(envelope).await?;

        Ok(Published {
            event_id,
            correlation_id,
            transaction_id,
        })
    }

    /// 允许从 Broker 接收指定类型的事件；已允许时返回 `false`
    pub fn register_inbound<E: Event>(&self) -> bool {
        let registered = self.inner.inbound.register::<E>();
        if registered {
            info!(event_type = E::EVENT_TYPE, "inbound event type registered");
        }
        registered
    }

    /// 接收一条 Broker 消息并在本地重新发布
    ///
    /// 按 `X-Event-Type` 头选择事件类型，新事件的因果ID为原事件ID，关联ID与元数据沿用原值。
    /// 返回错误时消息未被发布，消费端应拒绝或重新入队。
    pub async fn receive(&self, message: &OutboundMessage) -> EventBusResult<Published> {
        let envelope = self
            .inner
            .inbound
            .decode(self.inner.serializer.as_ref(), message)?;
        self.publish_envelope(Arc::new(envelope)).await
    }

    /// 以默认选项订阅指定阶段
    pub fn subscribe<E, H>(
        &self,
        phase: TransactionPhase,
        handler: H,
    ) -> EventBusResult<RegistrationHandle>
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        self.subscribe_with(ListenerOptions::builder().phase(phase).build(), handler)
    }

    pub fn subscribe_with<E, H>(
        &self,
        options: ListenerOptions,
        handler: H,
    ) -> EventBusResult<RegistrationHandle>
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let listener = handler.handler_name().to_string();
        let target = ListenerTarget::InProcess(erase_handler::<E, H>(Arc::new(handler)));
        let handle = self
            .inner
            .registry
            .register(E::EVENT_TYPE, listener.as_str(), options, target)?;

        info!(
            event_type = E::EVENT_TYPE,
            listener = %listener,
            phase = %options.phase(),
            order = options.order(),
            "listener subscribed"
        );
        Ok(handle)
    }

    /// 订阅一个经由 Broker 投递的目的地，监听器名称即目的地
    pub fn subscribe_broker<E: Event>(
        &self,
        options: ListenerOptions,
        destination: impl Into<String>,
    ) -> EventBusResult<RegistrationHandle> {
        let destination = destination.into();
        if !self.inner.broker_enabled {
            return Err(EventBusError::BrokerNotConfigured {
                listener: destination,
            });
        }

        let handle = self.inner.registry.register(
            E::EVENT_TYPE,
            destination.as_str(),
            options,
            ListenerTarget::Broker {
                destination: destination.clone(),
            },
        )?;

        info!(
            event_type = E::EVENT_TYPE,
            destination = %destination,
            phase = %options.phase(),
            "broker listener subscribed"
        );
        Ok(handle)
    }

    /// 注销监听器；已开始的分发不受影响
    pub fn unsubscribe(&self, handle: &RegistrationHandle) -> bool {
        let removed = self.inner.registry.unregister(handle);
        if removed {
            info!(event_type = handle.event_type(), id = handle.id(), "listener unsubscribed");
        }
        removed
    }

    /// 手动驱动事务生命周期（适用于不支持回调注册的宿主）
    pub async fn signal(
        &self,
        transaction_id: &TransactionId,
        signal: LifecycleSignal,
    ) -> EventBusResult<DispatchReport> {
        self.inner.scheduler.on_signal(transaction_id, signal).await
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub fn tracker(&self) -> &TransactionContextTracker {
        &self.inner.tracker
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// 等待所有进行中的 AFTER_* 释放完成
    pub async fn drain(&self) {
        self.inner.worker.drain().await;
    }

    /// 停止接收后台任务并等待其完成
    pub async fn shutdown(&self) {
        self.inner.worker.shutdown().await;
        info!("event bus shut down");
    }

    /// 清理超过保留时长的幂等记录
    pub async fn purge_processed_events(&self) -> EventBusResult<usize> {
        let retention =
            TimeDelta::from_std(self.inner.config.idempotency_retention).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.inner.processed.purge_older_than(cutoff).await
    }
}
