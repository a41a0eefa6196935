//! 事务上下文追踪器（TransactionContextTracker）
//!
//! 进程级的 事务ID → 缓冲区 映射，每个缓冲区维护一个小状态机：
//!
//! ```text
//! ACTIVE --BeforeCommit--> COMMITTING --AfterCommit--> COMMITTED
//!   |                          |
//!   +------AfterRollback-------+-----AfterRollback--> ROLLED_BACK
//! ```
//!
//! 进入终态时缓冲区从映射中移除，信封所有权随 `Release::Terminal` 转交调度器。
//! 其余信号组合一律视为非法：缓冲区被强制终止（丢弃信封，不做分发）。
//!
use super::manager::{TransactionId, TransactionManager, TransactionStatus};
use crate::error::{EventBusError, EventBusResult};
use crate::event::Envelope;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    Active,
    Committing,
    Committed,
    RolledBack,
}

impl BufferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BufferState::Committed | BufferState::RolledBack)
    }
}

/// 生命周期信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
    Begin,
    BeforeCommit,
    AfterCommit,
    AfterRollback,
}

impl From<TransactionStatus> for LifecycleSignal {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Committed => LifecycleSignal::AfterCommit,
            TransactionStatus::RolledBack => LifecycleSignal::AfterRollback,
        }
    }
}

/// 单个事务的待释放信封（按发布顺序）
#[derive(Debug, Clone)]
pub struct TransactionBuffer {
    transaction_id: TransactionId,
    envelopes: Vec<Arc<Envelope>>,
    state: BufferState,
    // 已释放给 BEFORE_COMMIT 的信封数
    released: usize,
    // 是否已向事务管理器注册生命周期回调
    subscribed: bool,
}

impl TransactionBuffer {
    fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            envelopes: Vec::new(),
            state: BufferState::Active,
            released: 0,
            subscribed: false,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn envelopes(&self) -> &[Arc<Envelope>] {
        &self.envelopes
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// 终态对应的事务状态
    pub fn status(&self) -> Option<TransactionStatus> {
        match self.state {
            BufferState::Committed => Some(TransactionStatus::Committed),
            BufferState::RolledBack => Some(TransactionStatus::RolledBack),
            _ => None,
        }
    }

    pub fn into_envelopes(self) -> Vec<Arc<Envelope>> {
        self.envelopes
    }

    fn take_unreleased(&mut self) -> Vec<Arc<Envelope>> {
        let pending = self.envelopes[self.released..].to_vec();
        self.released = self.envelopes.len();
        pending
    }
}

/// 信号处理结果
#[derive(Debug)]
pub enum Release {
    /// 无需释放
    Nothing,
    /// 进入提交阶段，待交给 BEFORE_COMMIT 监听器的信封
    BeforeCommit(Vec<Arc<Envelope>>),
    /// 已到终态，缓冲区已移出映射
    Terminal(TransactionBuffer),
}

pub struct TransactionContextTracker {
    manager: Arc<dyn TransactionManager>,
    buffers: DashMap<TransactionId, TransactionBuffer>,
}

impl TransactionContextTracker {
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            manager,
            buffers: DashMap::new(),
        }
    }

    /// 每次发布时向事务管理器查询
    pub fn current_transaction_id(&self) -> Option<TransactionId> {
        self.manager.current_transaction_id()
    }

    /// 获取缓冲区快照（不存在则创建）
    pub fn buffer_for(&self, transaction_id: &TransactionId) -> TransactionBuffer {
        self.buffers
            .entry(transaction_id.clone())
            .or_insert_with(|| TransactionBuffer::new(transaction_id.clone()))
            .clone()
    }

    /// 追加信封，返回缓冲区是否为本次新建
    pub fn append(&self, transaction_id: &TransactionId, envelope: Arc<Envelope>) -> bool {
        match self.buffers.entry(transaction_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().envelopes.push(envelope);
                false
            }
            Entry::Vacant(entry) => {
                let mut buffer = TransactionBuffer::new(transaction_id.clone());
                buffer.envelopes.push(envelope);
                entry.insert(buffer);
                true
            }
        }
    }

    /// 认领生命周期回调的注册
    ///
    /// 缓冲区存在且尚未认领时返回 `true`，调用方随后负责注册回调；
    /// 无论由 `Begin` 信号还是首次发布创建缓冲区，回调都只注册一次。
    pub fn claim_subscription(&self, transaction_id: &TransactionId) -> bool {
        match self.buffers.get_mut(transaction_id) {
            Some(mut buffer) if !buffer.subscribed => {
                buffer.subscribed = true;
                true
            }
            _ => false,
        }
    }

    /// 提交阶段追加的、尚未释放给 BEFORE_COMMIT 的信封
    pub fn take_unreleased(&self, transaction_id: &TransactionId) -> Vec<Arc<Envelope>> {
        match self.buffers.get_mut(transaction_id) {
            Some(mut buffer) if buffer.state == BufferState::Committing => {
                buffer.take_unreleased()
            }
            _ => Vec::new(),
        }
    }

    pub fn on_lifecycle_signal(
        &self,
        transaction_id: &TransactionId,
        signal: LifecycleSignal,
    ) -> EventBusResult<Release> {
        let mut entry = match self.buffers.entry(transaction_id.clone()) {
            Entry::Vacant(entry) => {
                if signal == LifecycleSignal::Begin {
                    entry.insert(TransactionBuffer::new(transaction_id.clone()));
                    debug!(transaction_id = %transaction_id, "transaction buffer opened");
                }
                // 未发布过事件的事务，其余信号无事可做
                return Ok(Release::Nothing);
            }
            Entry::Occupied(entry) => entry,
        };

        let state = entry.get().state;
        match (state, signal) {
            (BufferState::Active, LifecycleSignal::BeforeCommit) => {
                let buffer = entry.get_mut();
                buffer.state = BufferState::Committing;
                Ok(Release::BeforeCommit(buffer.take_unreleased()))
            }
            (BufferState::Committing, LifecycleSignal::AfterCommit) => {
                let mut buffer = entry.remove();
                buffer.state = BufferState::Committed;
                Ok(Release::Terminal(buffer))
            }
            (BufferState::Active | BufferState::Committing, LifecycleSignal::AfterRollback) => {
                let mut buffer = entry.remove();
                buffer.state = BufferState::RolledBack;
                Ok(Release::Terminal(buffer))
            }
            _ => {
                let buffer = entry.remove();
                warn!(
                    transaction_id = %transaction_id,
                    state = ?state,
                    signal = ?signal,
                    discarded = buffer.len(),
                    "invalid lifecycle transition, buffer force-terminated"
                );
                Err(EventBusError::InvalidLifecycleTransition {
                    transaction_id: transaction_id.clone(),
                    state,
                    signal,
                })
            }
        }
    }

    /// 直接丢弃缓冲区（不做分发）
    pub fn discard(&self, transaction_id: &TransactionId) -> Option<TransactionBuffer> {
        self.buffers.remove(transaction_id).map(|(_, buffer)| buffer)
    }

    pub fn state(&self, transaction_id: &TransactionId) -> Option<BufferState> {
        self.buffers.get(transaction_id).map(|b| b.state)
    }

    /// 尚未到达终态的缓冲区数量
    pub fn active_buffers(&self) -> usize {
        self.buffers.len()
    }
}
