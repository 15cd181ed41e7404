use async_trait::async_trait;

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::sandbox::Sandbox;

/// Provisions isolated environments of one backend kind.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    /// Backend name used in logs, e.g. "docker" or "process".
    fn name(&self) -> &str;
    /// Prepare backend resources (daemon connection, workspace root).
    /// `create()` fails until this has succeeded.
    async fn startup(&mut self) -> Result<()>;
    /// Create a sandbox for exactly one job, instantiated from `config.image`.
    async fn create(&self, config: SandboxConfig) -> Result<Box<dyn Sandbox>>;
    /// Kill anything still running in `sandbox` and delete its private
    /// filesystem. Never fails; problems are logged.
    async fn destroy(&self, sandbox: Box<dyn Sandbox>);
    /// Release backend resources. Takes `&mut self`, so a factory shared
    /// through `Arc` can only be shut down once every clone is gone.
    async fn shutdown(&mut self);
}
