use std::any::Any;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ExecRequest, ExecResult, ResourceUsage};

/// One job's isolated environment. `Any` lets a factory's `destroy()`
/// recover its own concrete type from the boxed trait object.
#[async_trait]
pub trait Sandbox: Send + Sync + Any {
    fn id(&self) -> &str;

    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn kill(&mut self) -> Result<()>;

    /// Write `content` at `path`, relative to the sandbox root. Parent
    /// directories are created; paths escaping the root are rejected.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;
    /// Run a command to completion or until `request.timeout` elapses.
    /// A timeout is not an error: the result carries `timed_out` and
    /// whatever output was captured before the kill.
    async fn exec(&self, request: &ExecRequest<'_>) -> Result<ExecResult>;
    /// Output captured so far by the latest `exec`, for callers that dropped
    /// its future before it returned. Backends that cannot recover it
    /// return an empty result.
    async fn partial_output(&self) -> ExecResult {
        ExecResult::default()
    }
    /// Peak usage observed across every command run so far.
    fn usage(&self) -> ResourceUsage;
}
