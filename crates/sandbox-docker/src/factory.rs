use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use sandbox::{Sandbox, SandboxConfig, SandboxError, SandboxFactory};
use tracing::{info, warn};

use crate::config::DockerConfig;
use crate::sandbox::DockerSandbox;

pub struct DockerFactory {
    config: DockerConfig,
    docker: Docker,
    started: bool,
}

impl DockerFactory {
    /// Connect to the local Docker daemon without allocating anything.
    /// Call `startup()` before use.
    pub fn new(config: DockerConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::BackendNotAvailable(format!("docker connect: {e}")))?;
        Ok(Self {
            config,
            docker,
            started: false,
        })
    }

    fn workspaces(&self) -> PathBuf {
        self.config.base_dir.join("workspaces")
    }
}

#[async_trait]
impl SandboxFactory for DockerFactory {
    fn name(&self) -> &str {
        "docker"
    }

    async fn startup(&mut self) -> sandbox::Result<()> {
        if self.started {
            return Err(SandboxError::CreationFailed("factory already started".into()));
        }
        self.docker
            .ping()
            .await
            .map_err(|e| SandboxError::BackendNotAvailable(format!("docker ping: {e}")))?;
        tokio::fs::create_dir_all(self.workspaces())
            .await
            .map_err(|e| {
                SandboxError::BackendNotAvailable(format!(
                    "mkdir {}: {e}",
                    self.workspaces().display()
                ))
            })?;
        self.started = true;
        info!(base_dir = %self.config.base_dir.display(), "factory started");
        Ok(())
    }

    async fn create(&self, config: SandboxConfig) -> sandbox::Result<Box<dyn Sandbox>> {
        if !self.started {
            return Err(SandboxError::CreationFailed("factory not started".into()));
        }
        let id = config.id.to_string();
        let workspace = self.workspaces().join(&id);

        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| SandboxError::CreationFailed(format!("mkdir workspace: {e}")))?;
        // The guest runs as an unprivileged uid and must be able to write
        // build output next to the sources.
        tokio::fs::set_permissions(&workspace, std::fs::Permissions::from_mode(0o777))
            .await
            .map_err(|e| SandboxError::CreationFailed(format!("chmod workspace: {e}")))?;

        info!(id = %id, image = %config.image, "sandbox created");
        Ok(Box::new(DockerSandbox::new(
            config,
            self.docker.clone(),
            self.config.clone(),
            workspace,
        )))
    }

    async fn destroy(&self, sandbox: Box<dyn Sandbox>) {
        let mut sandbox = match (sandbox as Box<dyn std::any::Any>).downcast::<DockerSandbox>() {
            Ok(s) => *s,
            Err(_) => {
                warn!("destroy called with non-docker sandbox, ignoring");
                return;
            }
        };

        let _ = sandbox.kill().await;
        sandbox.remove_all().await;

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
