use anyhow::Result as AnyResult;
use eventify_core::delivery::{
    BrokerChannel, BrokerError, BrokerSink, HEADER_CORRELATION_ID, HEADER_EVENT_ID,
    HEADER_EVENT_SOURCE, HEADER_EVENT_TYPE, HEADER_TRANSACTION_PHASE, InMemoryBroker,
    JsonSerializer, OutboundMessage, RetryPolicy, Serializer,
};
use eventify_core::eventing::{
    DispatchOutcome, Dispatcher, InMemoryProcessedEventStore, InMemoryReporter,
    ProcessedEventStore,
};
use eventify_core::listener::{ListenerRegistry, ListenerTarget};
use eventify_core::transaction::{InMemoryTransactionManager, NoTransactionManager};
use eventify_core::{
    CompletionMode, Envelope, EventBus, EventBusConfig, EventBusError, HandlerFn, ListenerContext,
    ListenerOptions, PublishContext, Published, TransactionPhase,
};
use eventify_macros::event;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[event(name = "order.placed")]
#[derive(PartialEq)]
struct OrderPlaced {
    order_id: String,
    total_cents: u64,
}

fn order(id: &str) -> OrderPlaced {
    OrderPlaced {
        order_id: id.to_string(),
        total_cents: 1299,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(3)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(4))
        .build()
}

fn channel(broker: Arc<InMemoryBroker>) -> Arc<BrokerChannel> {
    Arc::new(
        BrokerChannel::builder()
            .broker(broker)
            .serializer(Arc::new(JsonSerializer))
            .retry(fast_retry())
            .build(),
    )
}

fn context(event: OrderPlaced) -> ListenerContext {
    let envelope = Envelope::new(event, &PublishContext::default());
    ListenerContext::new(Arc::new(envelope), TransactionPhase::AfterCommit, None)
}

#[tokio::test]
async fn succeeds_on_third_attempt() -> AnyResult<()> {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next(2, BrokerError::Transient("connection reset".into()));
    let sink = BrokerSink::new(channel(broker.clone()), "orders-bridge", "orders");

    let receipt = sink.send(&context(order("o-1"))).await?;

    assert_eq!(receipt.attempts(), 3);
    assert_eq!(broker.attempts(), 3);
    assert_eq!(broker.published_to("orders").len(), 1);
    Ok(())
}

#[tokio::test]
async fn exhausts_after_max_attempts() -> AnyResult<()> {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next(3, BrokerError::Transient("broker unavailable".into()));
    let sink = BrokerSink::new(channel(broker.clone()), "orders-bridge", "orders");

    let err = sink.send(&context(order("o-2"))).await.unwrap_err();

    match err {
        EventBusError::DeliveryFailed {
            listener,
            destination,
            attempts,
            last_error,
        } => {
            assert_eq!(listener, "orders-bridge");
            assert_eq!(destination, "orders");
            assert_eq!(attempts, 3);
            assert!(last_error.contains("broker unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(broker.published().is_empty());
    Ok(())
}

#[tokio::test]
async fn permanent_error_stops_immediately() -> AnyResult<()> {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next(1, BrokerError::Permanent("unknown exchange".into()));
    let sink = BrokerSink::new(channel(broker.clone()), "orders-bridge", "orders");

    let err = sink.send(&context(order("o-3"))).await.unwrap_err();

    assert!(matches!(err, EventBusError::DeliveryFailed { attempts: 1, .. }));
    assert_eq!(broker.attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn after_commit_publishes_through_broker() -> AnyResult<()> {
    let manager = Arc::new(InMemoryTransactionManager::new());
    let broker = Arc::new(InMemoryBroker::new());
    let bus = EventBus::builder()
        .transaction_manager(manager.clone())
        .broker(broker.clone())
        .config(
            EventBusConfig::builder()
                .retry(fast_retry())
                .source("checkout-service")
                .build(),
        )
        .build();

    bus.subscribe_broker::<OrderPlaced>(ListenerOptions::default(), "orders.exchange")?;

    let tx = manager.begin();
    let published = manager
        .scope(&tx, async {
            bus.publish_with(
                order("o-4"),
                PublishContext::default().with_metadata("tenant", "acme"),
            )
            .await
        })
        .await?;
    assert!(broker.published().is_empty(), "nothing leaves before commit");

    manager.commit(&tx).await?;
    bus.drain().await;

    let messages = broker.published_to("orders.exchange");
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.routing_key(), "async.after_commit.order.placed");
    assert_eq!(message.header(HEADER_EVENT_ID), Some(published.event_id()));
    assert_eq!(message.header(HEADER_CORRELATION_ID), Some(published.correlation_id()));
    assert_eq!(message.header(HEADER_EVENT_TYPE), Some("order.placed"));
    assert_eq!(message.header(HEADER_TRANSACTION_PHASE), Some("AFTER_COMMIT"));
    assert_eq!(message.header(HEADER_EVENT_SOURCE), Some("checkout-service"));
    assert_eq!(message.header("tenant"), Some("acme"));

    let restored = JsonSerializer.deserialize(message.body())?;
    assert_eq!(restored.decode::<OrderPlaced>()?, order("o-4"));
    Ok(())
}

#[tokio::test]
async fn rollback_never_reaches_after_commit_destination() -> AnyResult<()> {
    let manager = Arc::new(InMemoryTransactionManager::new());
    let broker = Arc::new(InMemoryBroker::new());
    let bus = EventBus::builder()
        .transaction_manager(manager.clone())
        .broker(broker.clone())
        .build();

    bus.subscribe_broker::<OrderPlaced>(ListenerOptions::default(), "orders.exchange")?;
    bus.subscribe_broker::<OrderPlaced>(
        ListenerOptions::builder()
            .phase(TransactionPhase::AfterRollback)
            .build(),
        "orders.compensation",
    )?;

    let tx = manager.begin();
    manager
        .scope(&tx, async { bus.publish(order("o-5")).await })
        .await?;
    manager.rollback(&tx).await?;
    bus.drain().await;

    assert!(broker.published_to("orders.exchange").is_empty());
    let compensation = broker.published_to("orders.compensation");
    assert_eq!(compensation.len(), 1);
    assert_eq!(
        compensation[0].routing_key(),
        "async.after_rollback.order.placed"
    );
    Ok(())
}

#[tokio::test]
async fn exhausted_delivery_is_reported_not_thrown() -> AnyResult<()> {
    let manager = Arc::new(InMemoryTransactionManager::new());
    let broker = Arc::new(InMemoryBroker::new());
    let reporter = Arc::new(InMemoryReporter::default());
    let bus = EventBus::builder()
        .transaction_manager(manager.clone())
        .broker(broker.clone())
        .reporter(reporter.clone())
        .config(
            EventBusConfig::builder()
                .retry(fast_retry())
                .completion_mode(CompletionMode::Inline)
                .build(),
        )
        .build();
    bus.subscribe_broker::<OrderPlaced>(ListenerOptions::default(), "orders.exchange")?;

    broker.fail_next(3, BrokerError::Transient("timeout".into()));
    let tx = manager.begin();
    manager
        .scope(&tx, async { bus.publish(order("o-6")).await })
        .await?;
    manager.commit(&tx).await?;

    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].listener(), "orders.exchange");
    assert!(matches!(
        failures[0].error(),
        EventBusError::DeliveryFailed { attempts: 3, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn broker_subscription_requires_broker() {
    let bus = EventBus::builder()
        .transaction_manager(Arc::new(InMemoryTransactionManager::new()))
        .build();

    let err = bus
        .subscribe_broker::<OrderPlaced>(ListenerOptions::default(), "orders.exchange")
        .unwrap_err();
    assert!(matches!(err, EventBusError::BrokerNotConfigured { .. }));
    assert!(bus.registry().is_empty());
}

#[tokio::test]
async fn idempotent_listener_sees_event_once() -> AnyResult<()> {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryProcessedEventStore::new());
    let dispatcher = Dispatcher::new(Some(channel(broker.clone())), store.clone());

    let registry = ListenerRegistry::new();
    registry.register(
        "order.placed",
        "ledger",
        ListenerOptions::builder().idempotent(true).build(),
        ListenerTarget::Broker {
            destination: "ledger".into(),
        },
    )?;
    let registration = registry.lookup("order.placed")[0].clone();
    let envelope = Arc::new(Envelope::new(order("o-7"), &PublishContext::default()));

    let first = dispatcher
        .dispatch(&envelope, &registration, TransactionPhase::AfterCommit, None)
        .await;
    let second = dispatcher
        .dispatch(&envelope, &registration, TransactionPhase::AfterCommit, None)
        .await;

    assert!(matches!(first, Ok(DispatchOutcome::Delivered { attempts: 1 })));
    assert!(matches!(second, Ok(DispatchOutcome::Skipped)));
    assert_eq!(broker.published_to("ledger").len(), 1);
    assert_eq!(store.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_idempotent_delivery_is_not_marked() -> AnyResult<()> {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryProcessedEventStore::new());
    let dispatcher = Dispatcher::new(Some(channel(broker.clone())), store.clone());

    let registry = ListenerRegistry::new();
    registry.register(
        "order.placed",
        "ledger",
        ListenerOptions::builder().idempotent(true).build(),
        ListenerTarget::Broker {
            destination: "ledger".into(),
        },
    )?;
    let registration = registry.lookup("order.placed")[0].clone();
    let envelope = Arc::new(Envelope::new(order("o-8"), &PublishContext::default()));

    broker.fail_next(1, BrokerError::Permanent("rejected".into()));
    let first = dispatcher
        .dispatch(&envelope, &registration, TransactionPhase::AfterCommit, None)
        .await;
    assert!(first.is_err());
    assert!(store.is_empty());

    let retry = dispatcher
        .dispatch(&envelope, &registration, TransactionPhase::AfterCommit, None)
        .await;
    assert!(matches!(retry, Ok(DispatchOutcome::Delivered { .. })));
    Ok(())
}

#[tokio::test]
async fn purge_respects_retention() -> AnyResult<()> {
    let store = Arc::new(InMemoryProcessedEventStore::new());
    let bus = EventBus::builder()
        .transaction_manager(Arc::new(InMemoryTransactionManager::new()))
        .processed_events(store.clone())
        .config(
            EventBusConfig::builder()
                .idempotency_retention(Duration::ZERO)
                .build(),
        )
        .build();

    store.mark_processed("ledger", "e-1").await?;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(bus.purge_processed_events().await?, 1);
    assert!(store.is_empty());
    Ok(())
}

#[event(name = "order.cancelled")]
struct OrderCancelled {
    order_id: String,
}

fn consumer() -> EventBus {
    EventBus::builder()
        .transaction_manager(Arc::new(NoTransactionManager))
        .build()
}

/// 生产端提交一个订单，返回发布结果与 Broker 上的消息
async fn committed_order(order_id: &str) -> AnyResult<(Published, OutboundMessage)> {
    let manager = Arc::new(InMemoryTransactionManager::new());
    let broker = Arc::new(InMemoryBroker::new());
    let producer = EventBus::builder()
        .transaction_manager(manager.clone())
        .broker(broker.clone())
        .config(
            EventBusConfig::builder()
                .completion_mode(CompletionMode::Inline)
                .retry(fast_retry())
                .build(),
        )
        .build();
    producer.subscribe_broker::<OrderPlaced>(ListenerOptions::default(), "orders.exchange")?;

    let tx = manager.begin();
    let published = manager
        .scope(&tx, async {
            producer
                .publish_with(
                    order(order_id),
                    PublishContext::default().with_metadata("tenant", "acme"),
                )
                .await
        })
        .await?;
    manager.commit(&tx).await?;

    let message = broker
        .published_to("orders.exchange")
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no message on orders.exchange"))?;
    Ok((published, message))
}

#[tokio::test]
async fn inbound_message_is_republished_locally() -> AnyResult<()> {
    let (sent, message) = committed_order("o-9").await?;

    let bus = consumer();
    assert!(bus.register_inbound::<OrderPlaced>());
    assert!(!bus.register_inbound::<OrderPlaced>());

    let seen: Arc<Mutex<Vec<(OrderPlaced, Option<String>, String)>>> = Arc::default();
    let sink = seen.clone();
    bus.subscribe::<OrderPlaced, _>(
        TransactionPhase::Immediate,
        HandlerFn::new("fulfilment", move |event: OrderPlaced, ctx: ListenerContext| {
            let sink = sink.clone();
            async move {
                let tenant = ctx
                    .envelope()
                    .metadata()
                    .get("tenant")
                    .cloned()
                    .unwrap_or_default();
                sink.lock().unwrap().push((
                    event,
                    ctx.envelope().causation_id().map(str::to_string),
                    tenant,
                ));
                Ok::<_, anyhow::Error>(())
            }
        }),
    )?;

    let received = bus.receive(&message).await?;

    assert!(!received.is_buffered());
    assert_ne!(received.event_id(), sent.event_id());
    assert_eq!(received.correlation_id(), sent.correlation_id());
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(
            order("o-9"),
            Some(sent.event_id().to_string()),
            "acme".to_string()
        )]
    );
    Ok(())
}

#[tokio::test]
async fn inbound_rejects_unknown_or_malformed_messages() -> AnyResult<()> {
    let (sent, message) = committed_order("o-10").await?;
    let bus = consumer();
    bus.register_inbound::<OrderCancelled>();

    // 未登记的事件类型
    let err = bus.receive(&message).await.unwrap_err();
    assert!(matches!(
        err,
        EventBusError::InboundRejected { ref destination, ref reason }
            if destination == "orders.exchange" && reason.contains("order.placed")
    ));

    bus.register_inbound::<OrderPlaced>();

    // 缺少类型头
    let mut headers = message.headers().clone();
    headers.remove(HEADER_EVENT_TYPE);
    let headless = OutboundMessage::builder()
        .destination(message.destination())
        .routing_key(message.routing_key())
        .headers(headers)
        .content_type(message.content_type())
        .body(message.body().to_vec())
        .build();
    assert!(matches!(
        bus.receive(&headless).await.unwrap_err(),
        EventBusError::InboundRejected { .. }
    ));

    // 消息体无法解析
    let garbled = OutboundMessage::builder()
        .destination(message.destination())
        .routing_key(message.routing_key())
        .headers(message.headers().clone())
        .content_type(message.content_type())
        .body(b"not json".to_vec())
        .build();
    assert!(matches!(
        bus.receive(&garbled).await.unwrap_err(),
        EventBusError::Serialization { .. }
    ));

    assert!(bus.receive(&message).await?.event_id() != sent.event_id());
    Ok(())
}
