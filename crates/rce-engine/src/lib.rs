//! Execution engine for untrusted code: language registry, job descriptors,
//! the sandbox runner and result classification.

mod engine;
mod error;
mod files;
mod job;
mod language;
pub mod metrics;
mod pool;
mod result;
mod runner;

pub use engine::ExecutionEngine;
pub use error::{EngineError, EngineResult};
pub use files::{FileEntry, FileSet};
pub use job::{
    CodeRequest, DEFAULT_PROJECT_ID, DEFAULT_USER_ID, FilesRequest, Job, JobBuilder, JobContext,
    Payload,
};
pub use language::{Language, LanguageOverride, LanguageRegistry, LanguageSpec};
pub use metrics::{LogsResponse, MetricsQuery, MetricsRecorder};
pub use pool::SandboxPool;
pub use result::{EngineResponse, ExecutionResult, RunTimeStatus};
pub use runner::{RunReport, SandboxRunner};
