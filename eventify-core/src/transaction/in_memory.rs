//! 内存事务管理器（InMemoryTransactionManager）
//!
//! 以 tokio task-local 表示“当前事务”，提交/回滚由调用方显式驱动。
//! 提交流程：提交前回调（按注册顺序，期间新注册的回调同样会执行）→ 物理提交 → 完成后回调；
//! 任一提交前回调失败即否决提交，转为回滚。
//!
use super::manager::{
    AfterCompletionCallback, BeforeCommitCallback, TransactionId, TransactionManager,
    TransactionStatus,
};
use crate::error::{EventBusError, EventBusResult};
use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

tokio::task_local! {
    static CURRENT_TRANSACTION: TransactionId;
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("unknown transaction: {transaction_id}")]
    UnknownTransaction { transaction_id: TransactionId },
    #[error("transaction not active: {transaction_id}")]
    NotActive { transaction_id: TransactionId },
    #[error("commit vetoed: transaction={transaction_id}")]
    Vetoed {
        transaction_id: TransactionId,
        source: EventBusError,
    },
    #[error("commit failed: transaction={transaction_id}")]
    CommitFailed { transaction_id: TransactionId },
}

#[derive(Default)]
struct TransactionSlot {
    status: Option<TransactionStatus>,
    fail_commit: bool,
    before_commit: Vec<BeforeCommitCallback>,
    after_completion: Vec<AfterCompletionCallback>,
}

impl TransactionSlot {
    fn is_active(&self) -> bool {
        self.status.is_none()
    }
}

/// 回调不要求 `Sync`，因此以互斥锁保护整张表；锁从不跨越 await 持有
#[derive(Default)]
pub struct InMemoryTransactionManager {
    transactions: Mutex<HashMap<TransactionId, TransactionSlot>>,
}

impl InMemoryTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启新事务
    pub fn begin(&self) -> TransactionId {
        let transaction_id = TransactionId::generate();
        self.slots()
            .insert(transaction_id.clone(), TransactionSlot::default());
        debug!(transaction_id = %transaction_id, "transaction begun");
        transaction_id
    }

    /// 在事务作用域内执行 future，期间 `current_transaction_id` 返回该事务
    pub async fn scope<F: Future>(&self, transaction_id: &TransactionId, f: F) -> F::Output {
        CURRENT_TRANSACTION.scope(transaction_id.clone(), f).await
    }

    pub async fn commit(&self, transaction_id: &TransactionId) -> Result<(), TransactionError> {
        self.ensure_active(transaction_id)?;

        // 回调执行期间可能注册新的提交前回调，直到没有新的为止
        loop {
            let callbacks = self.take_before_commit(transaction_id);
            if callbacks.is_empty() {
                break;
            }
            for callback in callbacks {
                if let Err(source) = callback().await {
                    info!(transaction_id = %transaction_id, error = %source, "commit vetoed");
                    self.complete(transaction_id, TransactionStatus::RolledBack)
                        .await;
                    return Err(TransactionError::Vetoed {
                        transaction_id: transaction_id.clone(),
                        source,
                    });
                }
            }
        }

        let fail_commit = self
            .slots()
            .get(transaction_id)
            .is_some_and(|slot| slot.fail_commit);
        if fail_commit {
            self.complete(transaction_id, TransactionStatus::RolledBack)
                .await;
            return Err(TransactionError::CommitFailed {
                transaction_id: transaction_id.clone(),
            });
        }

        self.complete(transaction_id, TransactionStatus::Committed)
            .await;
        Ok(())
    }

    pub async fn rollback(&self, transaction_id: &TransactionId) -> Result<(), TransactionError> {
        self.ensure_active(transaction_id)?;
        self.complete(transaction_id, TransactionStatus::RolledBack)
            .await;
        Ok(())
    }

    /// 让下一次提交在提交前回调全部成功之后失败（模拟物理提交失败）
    pub fn fail_next_commit(&self, transaction_id: &TransactionId) -> Result<(), TransactionError> {
        self.ensure_active(transaction_id)?;
        if let Some(slot) = self.slots().get_mut(transaction_id) {
            slot.fail_commit = true;
        }
        Ok(())
    }

    /// 事务终态；仍处于活动状态或未知时为 `None`
    pub fn status(&self, transaction_id: &TransactionId) -> Option<TransactionStatus> {
        self.slots()
            .get(transaction_id)
            .and_then(|slot| slot.status)
    }

    pub fn active_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.is_active())
            .count()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TransactionId, TransactionSlot>> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_active(&self, transaction_id: &TransactionId) -> Result<(), TransactionError> {
        match self.slots().get(transaction_id) {
            None => Err(TransactionError::UnknownTransaction {
                transaction_id: transaction_id.clone(),
            }),
            Some(slot) if !slot.is_active() => Err(TransactionError::NotActive {
                transaction_id: transaction_id.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn take_before_commit(&self, transaction_id: &TransactionId) -> Vec<BeforeCommitCallback> {
        self.slots()
            .get_mut(transaction_id)
            .map(|slot| mem::take(&mut slot.before_commit))
            .unwrap_or_default()
    }

    async fn complete(&self, transaction_id: &TransactionId, status: TransactionStatus) {
        let callbacks = match self.slots().get_mut(transaction_id) {
            Some(slot) => {
                slot.status = Some(status);
                slot.before_commit.clear();
                mem::take(&mut slot.after_completion)
            }
            None => Vec::new(),
        };
        info!(transaction_id = %transaction_id, status = ?status, "transaction completed");

        for callback in callbacks {
            callback(status).await;
        }
    }

    fn with_active_slot(
        &self,
        transaction_id: &TransactionId,
        f: impl FnOnce(&mut TransactionSlot),
    ) -> EventBusResult<()> {
        match self.slots().get_mut(transaction_id) {
            Some(slot) if slot.is_active() => {
                f(slot);
                Ok(())
            }
            _ => Err(EventBusError::TransactionManager {
                reason: format!("transaction not active: {transaction_id}"),
            }),
        }
    }
}

impl TransactionManager for InMemoryTransactionManager {
    fn current_transaction_id(&self) -> Option<TransactionId> {
        let transaction_id = CURRENT_TRANSACTION.try_with(|id| id.clone()).ok()?;
        let active = self
            .slots()
            .get(&transaction_id)
            .is_some_and(|slot| slot.is_active());
        active.then_some(transaction_id)
    }

    fn register_before_commit(
        &self,
        transaction_id: &TransactionId,
        callback: BeforeCommitCallback,
    ) -> EventBusResult<()> {
        self.with_active_slot(transaction_id, |slot| slot.before_commit.push(callback))
    }

    fn register_after_completion(
        &self,
        transaction_id: &TransactionId,
        callback: AfterCompletionCallback,
    ) -> EventBusResult<()> {
        self.with_active_slot(transaction_id, |slot| {
            slot.after_completion.push(callback)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::Arc;

    fn before(
        f: impl FnOnce() -> BoxFuture<'static, EventBusResult<()>> + Send + 'static,
    ) -> BeforeCommitCallback {
        Box::new(f)
    }

    fn after(
        f: impl FnOnce(TransactionStatus) -> BoxFuture<'static, ()> + Send + 'static,
    ) -> AfterCompletionCallback {
        Box::new(f)
    }

    #[tokio::test]
    async fn scope_sets_current_transaction() {
        let manager = InMemoryTransactionManager::new();
        assert!(manager.current_transaction_id().is_none());

        let tx = manager.begin();
        let seen = manager
            .scope(&tx, async { manager.current_transaction_id() })
            .await;
        assert_eq!(seen, Some(tx.clone()));
        assert_eq!(manager.active_count(), 1);

        manager.commit(&tx).await.unwrap();
        assert_eq!(manager.status(&tx), Some(TransactionStatus::Committed));
        let seen = manager
            .scope(&tx, async { manager.current_transaction_id() })
            .await;
        assert!(seen.is_none());
    }

    #[tokio::test]
    async fn callbacks_run_in_order() {
        let manager = InMemoryTransactionManager::new();
        let tx = manager.begin();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        manager
            .register_after_completion(
                &tx,
                after(move |status| {
                    Box::pin(async move { l.lock().unwrap().push(format!("after:{status:?}")) })
                }),
            )
            .unwrap();
        let l = log.clone();
        manager
            .register_before_commit(
                &tx,
                before(move || {
                    Box::pin(async move {
                        l.lock().unwrap().push("before".to_string());
                        Ok(())
                    })
                }),
            )
            .unwrap();

        manager.commit(&tx).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["before", "after:Committed"]);
        assert!(matches!(
            manager.commit(&tx).await,
            Err(TransactionError::NotActive { .. })
        ));
    }

    #[tokio::test]
    async fn veto_rolls_back() {
        let manager = InMemoryTransactionManager::new();
        let tx = manager.begin();
        let statuses = Arc::new(Mutex::new(Vec::new()));

        manager
            .register_before_commit(
                &tx,
                before(|| {
                    Box::pin(async {
                        Err(EventBusError::TransactionManager {
                            reason: "boom".into(),
                        })
                    })
                }),
            )
            .unwrap();
        let s = statuses.clone();
        manager
            .register_after_completion(
                &tx,
                after(move |status| Box::pin(async move { s.lock().unwrap().push(status) })),
            )
            .unwrap();

        let err = manager.commit(&tx).await.unwrap_err();
        assert!(matches!(err, TransactionError::Vetoed { .. }));
        assert_eq!(manager.status(&tx), Some(TransactionStatus::RolledBack));
        assert_eq!(*statuses.lock().unwrap(), vec![TransactionStatus::RolledBack]);
    }

    #[tokio::test]
    async fn failed_physical_commit_rolls_back() {
        let manager = InMemoryTransactionManager::new();
        let tx = manager.begin();
        manager.fail_next_commit(&tx).unwrap();

        assert!(matches!(
            manager.commit(&tx).await,
            Err(TransactionError::CommitFailed { .. })
        ));
        assert_eq!(manager.status(&tx), Some(TransactionStatus::RolledBack));
        assert!(
            manager
                .register_before_commit(&tx, before(|| Box::pin(async { Ok(()) })))
                .is_err()
        );
    }

    #[tokio::test]
    async fn unknown_transaction() {
        let manager = InMemoryTransactionManager::new();
        let tx = TransactionId::from("missing");
        assert!(matches!(
            manager.rollback(&tx).await,
            Err(TransactionError::UnknownTransaction { .. })
        ));
    }
}
