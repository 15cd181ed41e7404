use std::sync::Arc;

use chrono::Utc;
use sandbox::ResourceLimits;
use tracing::{debug, info, warn};

use crate::job::{CodeRequest, FilesRequest, Job, JobBuilder};
use crate::language::LanguageRegistry;
use crate::metrics::{LogsResponse, MetricsError, MetricsQuery, MetricsRecorder, spawn_record};
use crate::result::{EngineResponse, ExecutionResult};
use crate::runner::{RunReport, SandboxRunner};

/// Validates requests, runs jobs and records metrics.
///
/// Every accepted job produces exactly one [`ExecutionResult`], whether it
/// succeeded, failed in the guest or failed in the infrastructure.
pub struct ExecutionEngine {
    registry: Arc<LanguageRegistry>,
    runner: SandboxRunner,
    limits: ResourceLimits,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<LanguageRegistry>, runner: SandboxRunner, limits: ResourceLimits) -> Self {
        Self {
            registry,
            runner,
            limits,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &SandboxRunner {
        &self.runner
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Single-source entry point.
    pub async fn execute(&self, request: CodeRequest) -> EngineResponse {
        match JobBuilder::new(&self.registry).code(request) {
            Ok(job) => self.dispatch(job).await,
            Err(e) => {
                debug!(error = %e, "request rejected");
                EngineResponse::rejected(&e)
            }
        }
    }

    /// Multi-file entry point.
    pub async fn execute_files(&self, request: FilesRequest) -> EngineResponse {
        match JobBuilder::new(&self.registry).files(request) {
            Ok(job) => self.dispatch(job).await,
            Err(e) => {
                debug!(error = %e, "request rejected");
                EngineResponse::rejected(&e)
            }
        }
    }

    /// Run an already-validated job to completion.
    pub async fn dispatch(&self, job: Job) -> EngineResponse {
        info!(job_id = %job.id(), language = %job.language(), "job accepted");
        let start_time = Utc::now().timestamp_millis();
        let outcome = self.runner.run(&job, &self.limits).await;
        let end_time = Utc::now().timestamp_millis().max(start_time);

        let response = match outcome {
            Ok(report) => {
                EngineResponse::completed(ExecutionResult::assemble(&job, start_time, end_time, report))
            }
            Err(e) => {
                let result =
                    ExecutionResult::assemble(&job, start_time, end_time, RunReport::internal(&e));
                EngineResponse::failed(result, &e)
            }
        };

        if job.context().save_metric
            && let Some(result) = &response.result
        {
            self.record(result);
        }
        response
    }

    fn record(&self, result: &ExecutionResult) {
        match &self.metrics {
            Some(recorder) if recorder.is_available() => {
                spawn_record(Arc::clone(recorder), result.clone());
            }
            Some(recorder) => {
                warn!(job_id = %result.job_id, backend = recorder.name(), "metrics backend unavailable, skipping");
            }
            None => debug!(job_id = %result.job_id, "no metrics backend configured"),
        }
    }

    /// Stored execution records, newest first.
    pub async fn logs(&self, query: &MetricsQuery) -> LogsResponse {
        let Some(recorder) = self.metrics.as_ref().filter(|r| r.is_available()) else {
            return LogsResponse::failed(&MetricsError::Unavailable);
        };
        match recorder.get(query).await {
            Ok(logs) => LogsResponse::ok(logs),
            Err(e) => {
                warn!(backend = recorder.name(), error = %e, "failed to read metrics");
                LogsResponse::failed(&e)
            }
        }
    }
}
