use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use futures_util::stream::{Stream, StreamExt};
use sandbox::{
    ExecRequest, ExecResult, OutputBuffer, ResourceLimits, ResourceUsage, Sandbox, SandboxConfig,
    SandboxError, workspace_path,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DockerConfig;
use crate::container::{container_name, create_body, observe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SandboxState {
    Created,
    Running,
    Stopped,
}

/// One job's environment: a private host workspace plus the containers
/// started from the language image to compile and run inside it.
pub struct DockerSandbox {
    /// Cached `config.id.to_string()`.
    pub(crate) id: String,
    /// Workspace bind-mounted into every container (deleted on destroy).
    pub(crate) workspace: PathBuf,
    docker: Docker,
    image: String,
    resources: ResourceLimits,
    factory_config: DockerConfig,
    state: SandboxState,
    seq: AtomicU32,
    /// Containers created and not yet removed.
    containers: Mutex<Vec<String>>,
    usage: Mutex<ResourceUsage>,
}

impl DockerSandbox {
    pub(crate) fn new(
        config: SandboxConfig,
        docker: Docker,
        factory_config: DockerConfig,
        workspace: PathBuf,
    ) -> Self {
        Self {
            id: config.id.to_string(),
            workspace,
            docker,
            image: config.image,
            resources: config.resources,
            factory_config,
            state: SandboxState::Created,
            seq: AtomicU32::new(0),
            containers: Mutex::new(Vec::new()),
            usage: Mutex::new(ResourceUsage::default()),
        }
    }

    fn track(&self, container_id: &str) {
        if let Ok(mut containers) = self.containers.lock() {
            containers.push(container_id.to_string());
        }
    }

    fn untrack(&self, container_id: &str) {
        if let Ok(mut containers) = self.containers.lock() {
            containers.retain(|c| c != container_id);
        }
    }

    fn tracked(&self) -> Vec<String> {
        self.containers
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Force-remove every container still tracked by this sandbox.
    pub(crate) async fn remove_all(&self) {
        for container_id in self.tracked() {
            self.remove_container(&container_id).await;
        }
    }

    async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            warn!(id = %self.id, container = %container_id, error = %e, "failed to remove container");
        }
        self.untrack(container_id);
    }

    async fn kill_all(&self) {
        for container_id in self.tracked() {
            let _ = self
                .docker
                .kill_container(&container_id, None::<KillContainerOptions>)
                .await;
        }
    }

    /// Start a created container and wait for it until `deadline` while
    /// sampling stats, then collect logs and exit state.
    async fn run_container(
        &self,
        container: &str,
        deadline: Instant,
    ) -> sandbox::Result<(ExecResult, ResourceUsage)> {
        let mut usage = ResourceUsage::default();
        let waited =
            tokio::time::timeout_at(deadline, self.wait_observing(container, &mut usage)).await;
        let timed_out = match waited {
            Ok(waited) => {
                waited?;
                false
            }
            Err(_) => true,
        };
        if timed_out {
            warn!(id = %self.id, container, "command timed out, killing container");
            let _ = self
                .docker
                .kill_container(container, None::<KillContainerOptions>)
                .await;
        }

        let (stdout, stderr) = self.collect_logs(container).await;

        let state = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state);
        let exit_code = if timed_out {
            None
        } else {
            state.as_ref().and_then(|s| s.exit_code)
        };
        let oom_killed = state.as_ref().and_then(|s| s.oom_killed).unwrap_or(false);

        Ok((
            ExecResult {
                exit_code,
                stdout,
                stderr,
                timed_out,
                oom_killed,
            },
            usage,
        ))
    }

    async fn wait_observing(
        &self,
        container: &str,
        usage: &mut ResourceUsage,
    ) -> sandbox::Result<()> {
        self.docker
            .start_container(container, None::<StartContainerOptions>)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("start container: {e}")))?;

        let mut wait = self
            .docker
            .wait_container(container, None::<WaitContainerOptions>);
        let mut stats = Some(self.docker.stats(
            container,
            Some(StatsOptions {
                stream: true,
                one_shot: false,
            }),
        ));

        // A nonzero exit surfaces as an error item on the wait stream; the
        // exit code is read from inspect afterwards either way.
        loop {
            let sample = tokio::select! {
                _ = wait.next() => break,
                sample = next_item(&mut stats), if stats.is_some() => sample,
            };
            match sample {
                Some(Ok(sample)) => observe(usage, &sample),
                Some(Err(e)) => {
                    debug!(id = %self.id, container, error = %e, "stats stream failed");
                    stats = None;
                }
                None => stats = None,
            }
        }
        Ok(())
    }

    /// Demultiplexed stdout and stderr of `container`, each capped.
    async fn collect_logs(&self, container: &str) -> (String, String) {
        let limit = self.resources.max_output_bytes;
        let mut stdout = OutputBuffer::new(limit);
        let mut stderr = OutputBuffer::new(limit);
        let mut logs = self.docker.logs(
            container,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(item) = logs.next().await {
            match item {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!(id = %self.id, container, error = %e, "log stream failed");
                    break;
                }
            }
        }
        (stdout.into_string(), stderr.into_string())
    }
}

/// Next item of an optional stream; a missing stream never yields.
async fn next_item<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&mut self) -> sandbox::Result<()> {
        if self.state != SandboxState::Created {
            return Err(SandboxError::StartFailed("sandbox already started".into()));
        }
        // Images are built and published out of band; a missing one is an
        // operational fault, not something to pull on the request path.
        self.docker
            .inspect_image(&self.image)
            .await
            .map_err(|e| {
                SandboxError::StartFailed(format!("image not available {}: {e}", self.image))
            })?;
        self.state = SandboxState::Running;
        info!(id = %self.id, image = %self.image, "sandbox started");
        Ok(())
    }

    async fn stop(&mut self) -> sandbox::Result<()> {
        if self.state != SandboxState::Running {
            return Ok(());
        }
        self.kill_all().await;
        self.state = SandboxState::Stopped;
        info!(id = %self.id, "sandbox stopped");
        Ok(())
    }

    async fn kill(&mut self) -> sandbox::Result<()> {
        self.kill_all().await;
        self.state = SandboxState::Stopped;
        Ok(())
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> sandbox::Result<()> {
        let target = workspace_path(&self.workspace, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        debug!(id = %self.id, path, bytes = content.len(), "file written");
        Ok(())
    }

    async fn exec(&self, request: &ExecRequest<'_>) -> sandbox::Result<ExecResult> {
        if self.state != SandboxState::Running {
            return Err(SandboxError::ExecFailed("sandbox not running".into()));
        }
        if request.argv.is_empty() {
            return Err(SandboxError::ExecFailed("empty command".into()));
        }

        // The timeout covers container creation and start as well.
        let deadline = Instant::now() + request.timeout;
        let name = container_name(&self.id, self.seq.fetch_add(1, Ordering::Relaxed));
        let body = create_body(
            &self.image,
            request.argv,
            &self.workspace,
            &self.resources,
            &self.factory_config,
        );
        let options = CreateContainerOptions {
            name: Some(name.clone()),
            ..Default::default()
        };
        // Tracked by name before the create call so a cancelled exec still
        // leaves something for `remove_all` to find.
        self.track(&name);
        let created = tokio::time::timeout_at(
            deadline,
            self.docker.create_container(Some(options), body),
        )
        .await;
        match created {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.untrack(&name);
                return Err(SandboxError::ExecFailed(format!("create container: {e}")));
            }
            Err(_) => {
                warn!(id = %self.id, container = %name, "timed out creating container");
                self.remove_container(&name).await;
                return Ok(ExecResult {
                    timed_out: true,
                    ..ExecResult::default()
                });
            }
        }

        let result = self.run_container(&name, deadline).await;
        self.remove_container(&name).await;

        let (exec, usage) = result?;
        if let Ok(mut total) = self.usage.lock() {
            total.merge(usage);
        }
        Ok(exec)
    }

    async fn partial_output(&self) -> ExecResult {
        let Some(container) = self.tracked().pop() else {
            return ExecResult::default();
        };
        let (stdout, stderr) = self.collect_logs(&container).await;
        ExecResult {
            stdout,
            stderr,
            ..ExecResult::default()
        }
    }

    fn usage(&self) -> ResourceUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}
