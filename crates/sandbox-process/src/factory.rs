use async_trait::async_trait;
use sandbox::{Sandbox, SandboxConfig, SandboxError, SandboxFactory};
use tracing::{info, warn};

use crate::config::ProcessConfig;
use crate::paths::FactoryPaths;
use crate::sandbox::ProcessSandbox;

pub struct ProcessFactory {
    config: ProcessConfig,
    paths: FactoryPaths,
    started: bool,
}

impl ProcessFactory {
    /// Create a new factory without touching the filesystem.
    /// Call `startup()` before use.
    pub fn new(config: ProcessConfig) -> Self {
        let paths = FactoryPaths::new(config.base_dir.clone());
        Self {
            config,
            paths,
            started: false,
        }
    }

    pub fn paths(&self) -> &FactoryPaths {
        &self.paths
    }
}

#[async_trait]
impl SandboxFactory for ProcessFactory {
    fn name(&self) -> &str {
        "process"
    }

    async fn startup(&mut self) -> sandbox::Result<()> {
        if self.started {
            return Err(SandboxError::CreationFailed("factory already started".into()));
        }
        tokio::fs::create_dir_all(self.paths.workspaces())
            .await
            .map_err(|e| {
                SandboxError::BackendNotAvailable(format!(
                    "mkdir {}: {e}",
                    self.paths.workspaces().display()
                ))
            })?;
        self.started = true;
        info!(base_dir = %self.paths.base_dir().display(), "factory started");
        Ok(())
    }

    async fn create(&self, config: SandboxConfig) -> sandbox::Result<Box<dyn Sandbox>> {
        if !self.started {
            return Err(SandboxError::CreationFailed("factory not started".into()));
        }
        let id = config.id.to_string();
        let workspace = self.paths.workspace(&id);

        // Clean a stale workspace from a previous crashed sandbox.
        if workspace.exists()
            && let Err(e) = tokio::fs::remove_dir_all(&workspace).await
        {
            warn!(id = %id, error = %e, "failed to clean stale workspace");
        }
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| SandboxError::CreationFailed(format!("mkdir workspace: {e}")))?;

        info!(id = %id, image = %config.image, "sandbox created");
        Ok(Box::new(ProcessSandbox::new(
            config,
            self.config.clone(),
            workspace,
        )))
    }

    async fn destroy(&self, sandbox: Box<dyn Sandbox>) {
        let mut sandbox = match (sandbox as Box<dyn std::any::Any>).downcast::<ProcessSandbox>() {
            Ok(s) => *s,
            Err(_) => {
                warn!("destroy called with non-process sandbox, ignoring");
                return;
            }
        };

        let _ = sandbox.kill().await;

        if let Err(e) = tokio::fs::remove_dir_all(&sandbox.workspace).await {
            warn!(id = %sandbox.id, error = %e, "failed to delete workspace");
        }
        info!(id = %sandbox.id, "sandbox destroyed");
    }

    async fn shutdown(&mut self) {
        self.started = false;
        info!("factory shutdown complete");
    }
}
