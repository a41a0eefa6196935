//! 监听器注册表（ListenerRegistry）
//!
//! 以事件类型为键维护监听器登记列表：
//! - 同一事件类型下，(监听器名称, 阶段) 唯一，重复注册立即失败；
//! - 列表按 (order, 注册序号) 排序，查找返回不可变快照；
//! - 注册/注销采用写时复制，正在进行的分发不会观察到中途修改。
//!
use crate::error::{EventBusError, EventBusResult};
use crate::listener::{ErasedHandler, TransactionPhase};
use bon::Builder;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 注册选项
#[derive(Builder, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    #[builder(default = TransactionPhase::AfterCommit)]
    phase: TransactionPhase,
    /// 同阶段内的执行顺序，数值越小越先执行
    #[builder(default)]
    order: i32,
    /// 是否按 (监听器, 事件ID) 去重
    #[builder(default)]
    idempotent: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        ListenerOptions::builder().build()
    }
}

impl ListenerOptions {
    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn idempotent(&self) -> bool {
        self.idempotent
    }
}

/// 监听器的执行目标
#[derive(Clone)]
pub enum ListenerTarget {
    /// 进程内调用
    InProcess(ErasedHandler),
    /// 经由 Broker 投递到外部目的地
    Broker { destination: String },
}

impl fmt::Debug for ListenerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerTarget::InProcess(_) => f.write_str("InProcess"),
            ListenerTarget::Broker { destination } => f
                .debug_struct("Broker")
                .field("destination", destination)
                .finish(),
        }
    }
}

/// 一条监听器登记
#[derive(Debug)]
pub struct ListenerRegistration {
    id: u64,
    event_type: &'static str,
    listener: String,
    options: ListenerOptions,
    target: ListenerTarget,
}

impl ListenerRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn listener_name(&self) -> &str {
        &self.listener
    }

    pub fn phase(&self) -> TransactionPhase {
        self.options.phase
    }

    pub fn order(&self) -> i32 {
        self.options.order
    }

    /// 注册序号（同 order 时的决胜依据）
    pub fn sequence(&self) -> u64 {
        self.id
    }

    pub fn is_idempotent(&self) -> bool {
        self.options.idempotent
    }

    pub fn target(&self) -> &ListenerTarget {
        &self.target
    }
}

/// 注销凭据
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    id: u64,
    event_type: &'static str,
}

impl RegistrationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }
}

type Snapshot = Arc<[Arc<ListenerRegistration>]>;

#[derive(Default)]
pub struct ListenerRegistry {
    by_type: DashMap<&'static str, Snapshot>,
    sequence: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器
    ///
    /// 在同一事件类型的条目锁内完成重复判定与替换，
    /// 并发注册同一 (监听器, 阶段) 时只有一个会成功。
    pub fn register(
        &self,
        event_type: &'static str,
        listener: impl Into<String>,
        options: ListenerOptions,
        target: ListenerTarget,
    ) -> EventBusResult<RegistrationHandle> {
        let listener = listener.into();
        let mut entry = self
            .by_type
            .entry(event_type)
            .or_insert_with(|| Arc::from(Vec::new()));

        if entry
            .iter()
            .any(|r| r.listener == listener && r.phase() == options.phase)
        {
            return Err(EventBusError::DuplicateRegistration {
                event_type,
                listener,
                phase: options.phase,
            });
        }

        let id = self.sequence.fetch_add(1, Ordering::SeqCst);
        let registration = Arc::new(ListenerRegistration {
            id,
            event_type,
            listener,
            options,
            target,
        });

        let mut next: Vec<_> = entry.iter().cloned().collect();
        next.push(registration);
        next.sort_by_key(|r| (r.order(), r.sequence()));
        *entry = Arc::from(next);

        Ok(RegistrationHandle { id, event_type })
    }

    /// 注销监听器，返回是否确实移除
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let Some(mut entry) = self.by_type.get_mut(handle.event_type) else {
            return false;
        };

        if !entry.iter().any(|r| r.id == handle.id) {
            return false;
        }

        let next: Vec<_> = entry
            .iter()
            .filter(|r| r.id != handle.id)
            .cloned()
            .collect();
        *entry = Arc::from(next);
        true
    }

    /// 某事件类型的全部登记（已排序的快照）
    pub fn lookup(&self, event_type: &str) -> Snapshot {
        self.by_type
            .get(event_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// 某事件类型在指定阶段的登记（保持顺序）
    pub fn lookup_phase(
        &self,
        event_type: &str,
        phase: TransactionPhase,
    ) -> Vec<Arc<ListenerRegistration>> {
        self.lookup(event_type)
            .iter()
            .filter(|r| r.phase() == phase)
            .cloned()
            .collect()
    }

    /// 是否存在需要缓冲的监听器（非 IMMEDIATE）
    pub fn has_buffered_listeners(&self, event_type: &str) -> bool {
        self.lookup(event_type)
            .iter()
            .any(|r| r.phase().is_buffered())
    }

    pub fn len(&self) -> usize {
        self.by_type.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前全部登记：(事件类型, 监听器名称, 阶段)
    pub fn registered_listeners(&self) -> Vec<(&'static str, String, TransactionPhase)> {
        let mut all: Vec<_> = self
            .by_type
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|r| (r.event_type, r.listener.clone(), r.phase()))
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort();
        all
    }
}
