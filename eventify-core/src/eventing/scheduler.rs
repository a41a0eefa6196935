//! 阶段调度器（PhaseScheduler）
//!
//! 接收事务生命周期信号，把缓冲区中的信封释放给对应阶段的监听器：
//! - 发布时：IMMEDIATE 监听器同步执行；处于事务中则把信封追加到缓冲区，
//!   缓冲区（由首次发布或 `Begin` 信号创建）向事务管理器注册一次提交前/完成后回调；
//! - BEFORE_COMMIT：同步释放，失败成批上报并把第一个失败返回给事务管理器以否决提交；
//! - AFTER_COMMIT / AFTER_ROLLBACK：每个信封先释放对应阶段，再释放 AFTER_COMPLETION，
//!   按发布顺序逐个信封执行，失败只上报。
//!
use super::dispatcher::{DispatchReport, Dispatcher};
use super::reporter::{DispatchReporter, FailureBatch};
use super::worker::{CompletionMode, CompletionWorker};
use crate::error::{EventBusError, EventBusResult};
use crate::event::Envelope;
use crate::listener::{ListenerRegistration, ListenerRegistry, TransactionPhase};
use crate::transaction::{
    LifecycleSignal, Release, TransactionBuffer, TransactionContextTracker, TransactionId,
    TransactionManager, TransactionStatus,
};
use bon::Builder;
use futures_util::FutureExt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Builder)]
pub struct PhaseScheduler {
    registry: Arc<ListenerRegistry>,
    tracker: Arc<TransactionContextTracker>,
    manager: Arc<dyn TransactionManager>,
    dispatcher: Dispatcher,
    reporter: Arc<dyn DispatchReporter>,
    worker: CompletionWorker,
    #[builder(default)]
    mode: CompletionMode,
}

impl PhaseScheduler {
    /// 发布一个信封，返回其所属事务（若有）
    pub async fn publish(
        self: &Arc<Self>,
        envelope: Arc<Envelope>,
    ) -> EventBusResult<Option<TransactionId>> {
        let transaction_id = self.tracker.current_transaction_id();
        let registrations = self.registry.lookup(envelope.event_type());

        if registrations
            .iter()
            .any(|r| r.phase() == TransactionPhase::Immediate)
        {
            let report = self
                .dispatch_phase(
                    &envelope,
                    &registrations,
                    TransactionPhase::Immediate,
                    transaction_id.as_ref(),
                )
                .await;
            self.report_failures(
                transaction_id.as_ref(),
                TransactionPhase::Immediate,
                &report,
            );
        }

        let Some(transaction_id) = transaction_id else {
            debug!(
                event_type = envelope.event_type(),
                event_id = %envelope.event_id(),
                "no active transaction, only immediate listeners fired"
            );
            return Ok(None);
        };

        let created = self.tracker.append(&transaction_id, envelope.clone());
        debug!(
            transaction_id = %transaction_id,
            event_type = envelope.event_type(),
            event_id = %envelope.event_id(),
            new_buffer = created,
            "event buffered"
        );

        self.ensure_lifecycle(&transaction_id)?;
        Ok(Some(transaction_id))
    }

    /// 处理一个生命周期信号
    ///
    /// 在 `CompletionMode::Spawned` 下，终态信号的释放在后台任务中进行，返回的报告为空。
    pub async fn on_signal(
        self: &Arc<Self>,
        transaction_id: &TransactionId,
        signal: LifecycleSignal,
    ) -> EventBusResult<DispatchReport> {
        match self.tracker.on_lifecycle_signal(transaction_id, signal)? {
            Release::Nothing => {
                if signal == LifecycleSignal::Begin {
                    self.ensure_lifecycle(transaction_id)?;
                }
                Ok(DispatchReport::default())
            }
            Release::BeforeCommit(envelopes) => {
                self.release_before_commit(transaction_id, envelopes).await
            }
            Release::Terminal(buffer) => {
                info!(
                    transaction_id = %transaction_id,
                    status = ?buffer.status(),
                    events = buffer.len(),
                    "transaction finished, releasing buffer"
                );
                match self.mode {
                    CompletionMode::Inline => Ok(self.release_terminal(buffer).await),
                    CompletionMode::Spawned => {
                        let this = self.clone();
                        self.worker.spawn(async move {
                            this.release_terminal(buffer).await;
                        });
                        Ok(DispatchReport::default())
                    }
                }
            }
        }
    }

    /// 缓冲区尚未注册生命周期回调时注册一次；宿主不支持回调时由其手动推送信号
    fn ensure_lifecycle(self: &Arc<Self>, transaction_id: &TransactionId) -> EventBusResult<()> {
        if !self.manager.supports_callbacks() || !self.tracker.claim_subscription(transaction_id) {
            return Ok(());
        }
        if let Err(err) = self.subscribe_lifecycle(transaction_id) {
            // 无法收到信号的缓冲区不能保留
            self.tracker.discard(transaction_id);
            return Err(err);
        }
        Ok(())
    }

    fn subscribe_lifecycle(self: &Arc<Self>, transaction_id: &TransactionId) -> EventBusResult<()> {
        let scheduler = Arc::downgrade(self);
        let id = transaction_id.clone();
        self.manager.register_before_commit(
            transaction_id,
            Box::new(move || {
                async move {
                    let Some(scheduler) = scheduler.upgrade() else {
                        return Ok(());
                    };
                    // 只有监听器失败可以否决提交，状态错误只上报
                    match scheduler.on_signal(&id, LifecycleSignal::BeforeCommit).await {
                        Ok(_) => Ok(()),
                        Err(err @ EventBusError::InvalidLifecycleTransition { .. }) => {
                            scheduler.reporter.report_error(&err);
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                }
                .boxed()
            }),
        )?;

        let scheduler = Arc::downgrade(self);
        let id = transaction_id.clone();
        self.manager.register_after_completion(
            transaction_id,
            Box::new(move |status: TransactionStatus| {
                async move {
                    let Some(scheduler) = scheduler.upgrade() else {
                        return;
                    };
                    if let Err(err) = scheduler.on_signal(&id, status.into()).await {
                        scheduler.reporter.report_error(&err);
                    }
                }
                .boxed()
            }),
        )?;

        debug!(transaction_id = %transaction_id, "subscribed to transaction lifecycle");
        Ok(())
    }

    async fn release_before_commit(
        &self,
        transaction_id: &TransactionId,
        envelopes: Vec<Arc<Envelope>>,
    ) -> EventBusResult<DispatchReport> {
        let mut report = DispatchReport::default();
        let mut pending = envelopes;

        // BEFORE_COMMIT 监听器发布的事件同样需要在提交前释放
        while !pending.is_empty() {
            for envelope in &pending {
                let registrations = self.registry.lookup(envelope.event_type());
                report.merge(
                    self.dispatch_phase(
                        envelope,
                        &registrations,
                        TransactionPhase::BeforeCommit,
                        Some(transaction_id),
                    )
                    .await,
                );
            }
            pending = self.tracker.take_unreleased(transaction_id);
        }

        let first = report.failures().first().map(|f| f.error().clone());
        self.report_failures(
            Some(transaction_id),
            TransactionPhase::BeforeCommit,
            &report,
        );

        match first {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn release_terminal(&self, buffer: TransactionBuffer) -> DispatchReport {
        let transaction_id = buffer.transaction_id().clone();
        let phase = match buffer.status() {
            Some(TransactionStatus::Committed) => TransactionPhase::AfterCommit,
            _ => TransactionPhase::AfterRollback,
        };

        let mut outcome = DispatchReport::default();
        let mut completion = DispatchReport::default();

        for envelope in buffer.into_envelopes() {
            let registrations = self.registry.lookup(envelope.event_type());
            outcome.merge(
                self.dispatch_phase(&envelope, &registrations, phase, Some(&transaction_id))
                    .await,
            );
            completion.merge(
                self.dispatch_phase(
                    &envelope,
                    &registrations,
                    TransactionPhase::AfterCompletion,
                    Some(&transaction_id),
                )
                .await,
            );
        }

        self.report_failures(Some(&transaction_id), phase, &outcome);
        self.report_failures(
            Some(&transaction_id),
            TransactionPhase::AfterCompletion,
            &completion,
        );

        outcome.merge(completion);
        outcome
    }

    /// 按注册表顺序逐个调用某阶段的监听器，单个失败不影响其余监听器
    async fn dispatch_phase(
        &self,
        envelope: &Arc<Envelope>,
        registrations: &[Arc<ListenerRegistration>],
        phase: TransactionPhase,
        transaction_id: Option<&TransactionId>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for registration in registrations {
            if registration.phase() != phase {
                continue;
            }
            report.record(
                self.dispatcher
                    .dispatch(envelope, registration, phase, transaction_id)
                    .await,
            );
        }
        report
    }

    fn report_failures(
        &self,
        transaction_id: Option<&TransactionId>,
        phase: TransactionPhase,
        report: &DispatchReport,
    ) {
        if report.is_success() {
            return;
        }
        let failures = report.failures().to_vec();
        self.reporter
            .report(&FailureBatch::new(transaction_id.cloned(), phase, failures));
    }
}
