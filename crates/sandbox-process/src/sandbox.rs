use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sandbox::{
    ExecRequest, ExecResult, OutputBuffer, ResourceLimits, ResourceUsage, Sandbox, SandboxConfig,
    SandboxError, workspace_path,
};
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::process::{
    ProcessGroupGuard, RlimitPlan, SANDBOX_ENV, SharedOutput, drain, kill_process_group,
    kill_tagged, sample_proc, snapshot,
};

/// How often a running guest's procfs entry is sampled.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);
/// How long the pipe readers get to reach EOF once the command is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SandboxState {
    Created,
    Running,
    Stopped,
}

/// A private workspace directory on the host; every command runs as its own
/// process group rooted there, with rlimits applied before `exec`.
///
/// Guests run as the service user. Processes that leave their group are
/// found through their `RCE_SANDBOX` environment tag, which a guest can
/// scrub; use the docker backend where guests are untrusted.
pub struct ProcessSandbox {
    /// Cached `config.id.to_string()`.
    pub(crate) id: String,
    /// Private root (deleted by the factory on destroy).
    pub(crate) workspace: PathBuf,
    resources: ResourceLimits,
    factory_config: ProcessConfig,
    state: SandboxState,
    /// PID of the group leader currently executing, if any.
    running: Mutex<Option<u32>>,
    /// Stdout and stderr sinks of the latest command.
    capture: Mutex<Option<(SharedOutput, SharedOutput)>>,
    usage: Mutex<ResourceUsage>,
}

impl ProcessSandbox {
    pub(crate) fn new(config: SandboxConfig, factory_config: ProcessConfig, workspace: PathBuf) -> Self {
        Self {
            id: config.id.to_string(),
            workspace,
            resources: config.resources,
            factory_config,
            state: SandboxState::Created,
            running: Mutex::new(None),
            capture: Mutex::new(None),
            usage: Mutex::new(ResourceUsage::default()),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn set_running(&self, pid: Option<u32>) {
        if let Ok(mut running) = self.running.lock() {
            *running = pid;
        }
    }

    /// Kill the current group and every tagged process that left it.
    async fn kill_running(&self) {
        let pid = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        let escaped = kill_tagged(&self.id).await;
        if escaped > 0 {
            warn!(id = %self.id, escaped, "killed processes outside the command's group");
        }
    }

    fn new_capture(&self) -> (SharedOutput, SharedOutput) {
        let limit = self.resources.max_output_bytes;
        let pair: (SharedOutput, SharedOutput) = (
            Arc::new(Mutex::new(OutputBuffer::new(limit))),
            Arc::new(Mutex::new(OutputBuffer::new(limit))),
        );
        if let Ok(mut capture) = self.capture.lock() {
            *capture = Some((Arc::clone(&pair.0), Arc::clone(&pair.1)));
        }
        pair
    }

    fn build_command(&self, request: &ExecRequest<'_>) -> sandbox::Result<tokio::process::Command> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| SandboxError::ExecFailed("empty command".into()))?;

        let resolved = which::which_in(program, Some(&self.factory_config.path_env), &self.workspace)
            .map_err(|e| SandboxError::ExecFailed(format!("{program}: {e}")))?;

        let mut command = tokio::process::Command::new(resolved);
        command
            .args(args)
            .current_dir(&self.workspace)
            .env_clear()
            .env("PATH", &self.factory_config.path_env)
            .env("HOME", &self.workspace)
            .env("TMPDIR", &self.workspace)
            .env(SANDBOX_ENV, &self.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let plan = RlimitPlan::new(&self.resources, self.factory_config.limit_address_space);
        // SAFETY: the closure only calls setrlimit(2), which is
        // async-signal-safe, and captures a `Copy` value.
        unsafe {
            command.pre_exec(move || plan.apply());
        }
        Ok(command)
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&mut self) -> sandbox::Result<()> {
        if self.state != SandboxState::Created {
            return Err(SandboxError::StartFailed("sandbox already started".into()));
        }
        let exists = tokio::fs::try_exists(&self.workspace)
            .await
            .map_err(|e| SandboxError::StartFailed(format!("check workspace: {e}")))?;
        if !exists {
            return Err(SandboxError::StartFailed(format!(
                "workspace missing: {}",
                self.workspace.display()
            )));
        }
        self.state = SandboxState::Running;
        info!(id = %self.id, "sandbox started");
        Ok(())
    }

    async fn stop(&mut self) -> sandbox::Result<()> {
        if self.state != SandboxState::Running {
            return Ok(());
        }
        self.kill_running().await;
        self.state = SandboxState::Stopped;
        info!(id = %self.id, "sandbox stopped");
        Ok(())
    }

    async fn kill(&mut self) -> sandbox::Result<()> {
        self.kill_running().await;
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

        let mut command = self.build_command(request)?;
        let mut child = command
            .spawn()
            .map_err(|e| SandboxError::ExecFailed(format!("spawn: {e}")))?;
        let pid = child.id();
        let _group = ProcessGroupGuard::new(pid);
        self.set_running(pid);

        let (stdout, stderr) = self.new_capture();
        let mut stdout_task = tokio::spawn(drain(child.stdout.take(), Arc::clone(&stdout)));
        let mut stderr_task = tokio::spawn(drain(child.stderr.take(), Arc::clone(&stderr)));

        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        let mut usage = ResourceUsage::default();

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break Some(status.map_err(|e| SandboxError::ExecFailed(format!("wait: {e}")))?);
                }
                _ = &mut deadline => break None,
                _ = ticker.tick() => {
                    if let Some(pid) = pid
                        && let Some(sample) = sample_proc(pid).await
                    {
                        usage = sample;
                    }
                }
            }
        };

        let timed_out = status.is_none();
        if timed_out {
            warn!(id = %self.id, timeout_ms = request.timeout.as_millis() as u64, "command timed out, killing");
        }
        // Stray background children would otherwise hold the pipes open.
        self.kill_running().await;
        if timed_out {
            let _ = child.wait().await;
        }

        for (stream, task) in [("stdout", &mut stdout_task), ("stderr", &mut stderr_task)] {
            if tokio::time::timeout(DRAIN_GRACE, &mut *task).await.is_err() {
                warn!(id = %self.id, stream, "pipe still open after exit, abandoning reader");
                task.abort();
            }
        }
        let (stdout, stderr) = (snapshot(&stdout), snapshot(&stderr));

        if let Ok(mut total) = self.usage.lock() {
            total.merge(usage);
        }

        let exit_code = status.and_then(|s| {
            use std::os::unix::process::ExitStatusExt;
            s.code().or_else(|| s.signal().map(|sig| 128 + sig))
        });

        Ok(ExecResult {
            exit_code: exit_code.map(i64::from),
            stdout,
            stderr,
            timed_out,
            oom_killed: false,
        })
    }

    async fn partial_output(&self) -> ExecResult {
        let capture = self.capture.lock().ok().and_then(|c| c.clone());
        let Some((stdout, stderr)) = capture else {
            return ExecResult::default();
        };
        ExecResult {
            stdout: snapshot(&stdout),
            stderr: snapshot(&stderr),
            ..ExecResult::default()
        }
    }

    fn usage(&self) -> ResourceUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}
