use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::job::{Job, Payload};
use crate::language::Language;
use crate::runner::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunTimeStatus {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    InternalError,
}

/// The record of one finished job: what was run, what it printed, how it
/// ended and what it cost. This is also the metrics record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub language: Language,
    pub user_id: String,
    pub project_id: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub output: String,
    pub error_message: String,
    /// Peak bytes, when the backend could observe it.
    pub memory_usage: Option<u64>,
    /// CPU milliseconds, when the backend could observe it.
    pub cpu_usage: Option<u64>,
    pub run_time_status: RunTimeStatus,
    #[serde(flatten)]
    pub payload: Payload,
}

impl ExecutionResult {
    pub(crate) fn assemble(job: &Job, start_time: i64, end_time: i64, report: RunReport) -> Self {
        Self {
            job_id: job.id(),
            language: job.language(),
            user_id: job.context().user_id.clone(),
            project_id: job.context().project_id.clone(),
            start_time,
            end_time,
            duration: end_time - start_time,
            output: report.output,
            error_message: report.error_message,
            memory_usage: report.usage.peak_memory_bytes,
            cpu_usage: report
                .usage
                .cpu_time
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            run_time_status: report.status,
            payload: job.payload().clone(),
        }
    }
}

/// The engine's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EngineResponse {
    pub(crate) fn completed(result: ExecutionResult) -> Self {
        Self {
            succeeded: true,
            result: Some(result),
            error_message: None,
        }
    }

    /// Infrastructure failure after the job was accepted.
    pub(crate) fn failed(result: ExecutionResult, error: &EngineError) -> Self {
        Self {
            succeeded: false,
            result: Some(result),
            error_message: Some(error.to_string()),
        }
    }

    /// Request refused before a job existed.
    pub(crate) fn rejected(error: &EngineError) -> Self {
        Self {
            succeeded: false,
            result: None,
            error_message: Some(error.to_string()),
        }
    }
}
