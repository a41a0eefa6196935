//! 幂等处理记录
//!
//! 以 (监听器名称, 事件ID) 为键，记录幂等监听器已成功处理的事件。
//!
use crate::error::EventBusResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_processed(&self, listener: &str, event_id: &str) -> EventBusResult<bool>;

    /// 仅在处理成功后调用
    async fn mark_processed(&self, listener: &str, event_id: &str) -> EventBusResult<()>;

    /// 清理早于 `cutoff` 的记录，返回清理条数
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> EventBusResult<usize>;
}

#[derive(Debug, Default)]
pub struct InMemoryProcessedEventStore {
    processed: DashMap<(String, String), DateTime<Utc>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    fn key(listener: &str, event_id: &str) -> (String, String) {
        (listener.to_string(), event_id.to_string())
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn is_processed(&self, listener: &str, event_id: &str) -> EventBusResult<bool> {
        Ok(self
            .processed
            .contains_key(&Self::key(listener, event_id)))
    }

    async fn mark_processed(&self, listener: &str, event_id: &str) -> EventBusResult<()> {
        self.processed
            .insert(Self::key(listener, event_id), Utc::now());
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> EventBusResult<usize> {
        let mut removed = 0;
        self.processed.retain(|_, processed_at| {
            let keep = *processed_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
