//! Execution metrics: an optional store of [`ExecutionResult`] records.
//!
//! Recording is fire-and-forget. A slow or failing backend never changes
//! the result returned to the caller.

mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::language::Language;
use crate::result::{ExecutionResult, RunTimeStatus};

pub use http::HttpMetricsRecorder;
pub use memory::MemoryMetricsStore;

pub const DEFAULT_LOG_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Database not available")]
    Unavailable,

    #[error("metrics request failed: {0}")]
    Request(String),

    #[error("metrics store error: {0}")]
    Store(String),
}

/// Paging and filtering for stored records; newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time_status: Option<RunTimeStatus>,
}

fn default_limit() -> usize {
    DEFAULT_LOG_LIMIT
}

impl Default for MetricsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LOG_LIMIT,
            skip: 0,
            language: None,
            user_id: None,
            project_id: None,
            run_time_status: None,
        }
    }
}

impl MetricsQuery {
    pub fn matches(&self, record: &ExecutionResult) -> bool {
        self.language.is_none_or(|l| l == record.language)
            && self
                .user_id
                .as_deref()
                .is_none_or(|u| u == record.user_id)
            && self
                .project_id
                .as_deref()
                .is_none_or(|p| p == record.project_id)
            && self
                .run_time_status
                .is_none_or(|s| s == record.run_time_status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsResponse {
    pub succeeded: bool,
    pub logs: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogsResponse {
    pub fn ok(logs: Vec<ExecutionResult>) -> Self {
        Self {
            succeeded: true,
            logs,
            error: None,
        }
    }

    pub fn failed(error: &MetricsError) -> Self {
        Self {
            succeeded: false,
            logs: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    /// Backend name for logs (e.g. "memory").
    fn name(&self) -> &str;
    /// Whether the backend can currently accept records.
    fn is_available(&self) -> bool;
    async fn create_metric(&self, record: &ExecutionResult) -> Result<(), MetricsError>;
    async fn get(&self, query: &MetricsQuery) -> Result<Vec<ExecutionResult>, MetricsError>;
}

/// Record `record` in the background. Failures are logged and dropped.
pub fn spawn_record(recorder: Arc<dyn MetricsRecorder>, record: ExecutionResult) -> JoinHandle<()> {
    tokio::spawn(async move {
        match recorder.create_metric(&record).await {
            Ok(()) => debug!(job_id = %record.job_id, backend = recorder.name(), "metrics saved"),
            Err(e) => warn!(
                job_id = %record.job_id,
                backend = recorder.name(),
                error = %e,
                "failed to save metrics"
            ),
        }
    })
}
