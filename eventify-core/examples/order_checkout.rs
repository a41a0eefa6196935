use async_trait::async_trait;
use eventify_core::delivery::InMemoryBroker;
use eventify_core::eventing::InMemoryReporter;
use eventify_core::transaction::InMemoryTransactionManager;
use eventify_core::{
    EventBus, EventBusConfig, EventHandler, HandlerFn, ListenerContext, ListenerOptions,
    PublishContext, RetryPolicy, TransactionPhase,
};
use eventify_macros::event;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[event(name = "checkout.order_placed")]
struct OrderPlaced {
    order_id: String,
    total_cents: u64,
}

struct StockGuard;

#[async_trait]
impl EventHandler<OrderPlaced> for StockGuard {
    fn handler_name(&self) -> &str {
        "stock-guard"
    }

    async fn handle(&self, event: &OrderPlaced, _ctx: &ListenerContext) -> anyhow::Result<()> {
        if event.total_cents == 0 {
            anyhow::bail!("order {} has no billable items", event.order_id);
        }
        println!("[stock-guard] reserved stock for {}", event.order_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let manager = Arc::new(InMemoryTransactionManager::new());
    let broker = Arc::new(InMemoryBroker::new());
    let reporter = Arc::new(InMemoryReporter::default());

    let bus = EventBus::builder()
        .transaction_manager(manager.clone())
        .broker(broker.clone())
        .reporter(reporter.clone())
        .config(
            EventBusConfig::builder()
                .source("checkout-service")
                .retry(
                    RetryPolicy::builder()
                        .initial_backoff(Duration::from_millis(10))
                        .build(),
                )
                .build(),
        )
        .build();

    bus.subscribe::<OrderPlaced, _>(
        TransactionPhase::Immediate,
        HandlerFn::new("audit", |event: OrderPlaced, _ctx: ListenerContext| async move {
            println!("[audit] saw {} immediately", event.order_id);
            Ok::<_, anyhow::Error>(())
        }),
    )?;
    bus.subscribe::<OrderPlaced, _>(TransactionPhase::BeforeCommit, StockGuard)?;
    bus.subscribe::<OrderPlaced, _>(
        TransactionPhase::AfterCommit,
        HandlerFn::new("mailer", |event: OrderPlaced, ctx: ListenerContext| async move {
            println!(
                "[mailer] confirmation for {} (transaction={:?})",
                event.order_id,
                ctx.transaction_id().map(|id| id.to_string())
            );
            Ok::<_, anyhow::Error>(())
        }),
    )?;
    bus.subscribe::<OrderPlaced, _>(
        TransactionPhase::AfterRollback,
        HandlerFn::new("compensator", |event: OrderPlaced, _ctx: ListenerContext| async move {
            println!("[compensator] releasing hold for {}", event.order_id);
            Ok::<_, anyhow::Error>(())
        }),
    )?;
    bus.subscribe_broker::<OrderPlaced>(
        ListenerOptions::builder()
            .phase(TransactionPhase::AfterCommit)
            .idempotent(true)
            .build(),
        "orders.exchange",
    )?;

    // 1. 正常提交：IMMEDIATE -> BEFORE_COMMIT -> AFTER_COMMIT（含 Broker 投递）
    let tx = manager.begin();
    manager
        .scope(&tx, async {
            bus.publish_with(
                OrderPlaced {
                    order_id: "o-1001".into(),
                    total_cents: 4200,
                },
                PublishContext::builder()
                    .correlation_id("checkout-42".to_string())
                    .build(),
            )
            .await
        })
        .await?;
    manager.commit(&tx).await?;

    // 2. 提交前否决：StockGuard 失败导致回滚，AFTER_ROLLBACK 监听器执行
    let tx = manager.begin();
    manager
        .scope(&tx, async {
            bus.publish(OrderPlaced {
                order_id: "o-1002".into(),
                total_cents: 0,
            })
            .await
        })
        .await?;
    if let Err(err) = manager.commit(&tx).await {
        println!("commit vetoed: {err}");
    }

    bus.drain().await;

    for message in broker.published_to("orders.exchange") {
        println!(
            "[broker] {} routing_key={} bytes={}",
            message.destination(),
            message.routing_key(),
            message.body().len()
        );
    }
    for failure in reporter.failures() {
        println!(
            "[reporter] listener={} phase={} error={}",
            failure.listener(),
            failure.phase(),
            failure.error()
        );
    }

    bus.shutdown().await;
    Ok(())
}
