use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MetricsError, MetricsQuery, MetricsRecorder};
use crate::result::ExecutionResult;

/// Bounded in-process store. Oldest records are evicted first.
pub struct MemoryMetricsStore {
    capacity: usize,
    records: RwLock<VecDeque<ExecutionResult>>,
}

impl MemoryMetricsStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetricsRecorder for MemoryMetricsStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn create_metric(&self, record: &ExecutionResult) -> Result<(), MetricsError> {
        let mut records = self.records.write().await;
        records.push_front(record.clone());
        records.truncate(self.capacity);
        Ok(())
    }

    async fn get(&self, query: &MetricsQuery) -> Result<Vec<ExecutionResult>, MetricsError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| query.matches(r))
            .skip(query.skip)
            .take(query.limit)
            .cloned()
            .collect())
    }
}
