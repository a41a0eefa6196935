//! 失败上报协作方（DispatchReporter）
//!
//! 阶段触发的分发失败按信号成批上报，而不是抛回事务管理器（BEFORE_COMMIT 否决除外）。
//! - `TracingReporter`：默认实现，逐条记录 error 日志；
//! - `InMemoryReporter`：保存全部批次与错误，并提供 `'static` 批次流，便于测试观察。
//!
use super::dispatcher::DispatchFailure;
use crate::error::EventBusError;
use crate::listener::TransactionPhase;
use crate::transaction::TransactionId;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::error;

/// 一次信号（或一次发布）产生的失败集合
#[derive(Debug, Clone)]
pub struct FailureBatch {
    transaction_id: Option<TransactionId>,
    phase: TransactionPhase,
    failures: Vec<DispatchFailure>,
}

impl FailureBatch {
    pub fn new(
        transaction_id: Option<TransactionId>,
        phase: TransactionPhase,
        failures: Vec<DispatchFailure>,
    ) -> Self {
        Self {
            transaction_id,
            phase,
            failures,
        }
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn failures(&self) -> &[DispatchFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

pub trait DispatchReporter: Send + Sync {
    fn report(&self, batch: &FailureBatch);

    /// 无法返回给调用方的错误（例如完成后回调中的非法状态转换）
    fn report_error(&self, error: &EventBusError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl DispatchReporter for TracingReporter {
    fn report(&self, batch: &FailureBatch) {
        let transaction_id = batch
            .transaction_id()
            .map(TransactionId::as_str)
            .unwrap_or("-");

        for failure in batch.failures() {
            error!(
                transaction_id = %transaction_id,
                phase = %batch.phase(),
                listener = %failure.listener(),
                event_id = %failure.event_id(),
                error = %failure.error(),
                "listener dispatch failed"
            );
        }
    }

    fn report_error(&self, err: &EventBusError) {
        error!(error = %err, "event bus error");
    }
}

pub struct InMemoryReporter {
    batches: Mutex<Vec<FailureBatch>>,
    errors: Mutex<Vec<EventBusError>>,
    tx: broadcast::Sender<FailureBatch>,
}

impl Default for InMemoryReporter {
    fn default() -> Self {
        Self::new(64)
    }
}

impl InMemoryReporter {
    /// `capacity` 为批次流的广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            batches: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            tx,
        }
    }

    pub fn batches(&self) -> Vec<FailureBatch> {
        lock(&self.batches).clone()
    }

    /// 所有批次中的失败（按上报顺序展开）
    pub fn failures(&self) -> Vec<DispatchFailure> {
        lock(&self.batches)
            .iter()
            .flat_map(|batch| batch.failures().iter().cloned())
            .collect()
    }

    pub fn errors(&self) -> Vec<EventBusError> {
        lock(&self.errors).clone()
    }

    /// 订阅之后上报的批次；落后过多的订阅者会跳过丢失的批次
    pub fn subscribe(&self) -> BoxStream<'static, FailureBatch> {
        let rx = self.tx.subscribe();
        BroadcastStream::new(rx)
            .filter_map(|r| async move { r.ok() })
            .boxed()
    }
}

impl DispatchReporter for InMemoryReporter {
    fn report(&self, batch: &FailureBatch) {
        lock(&self.batches).push(batch.clone());
        // 无订阅者时 send 返回错误，忽略即可
        let _ = self.tx.send(batch.clone());
    }

    fn report_error(&self, err: &EventBusError) {
        lock(&self.errors).push(err.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
