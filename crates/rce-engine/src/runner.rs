use std::sync::Arc;
use std::time::Duration;

use sandbox::{
    ExecRequest, ExecResult, ResourceLimits, ResourceUsage, Sandbox, SandboxConfig, SandboxFactory,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::job::{Job, Payload};
use crate::language::{LanguageRegistry, LanguageSpec};
use crate::pool::SandboxPool;
use crate::result::RunTimeStatus;

/// Extra time a sandbox gets to honor its own deadline before the runner
/// kills it.
pub const KILL_GRACE: Duration = Duration::from_millis(500);

/// Outcome of driving one job through a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunTimeStatus,
    pub output: String,
    pub error_message: String,
    pub usage: ResourceUsage,
}

impl RunReport {
    /// Report for a job the infrastructure could not complete.
    pub fn internal(error: &EngineError) -> Self {
        Self {
            status: RunTimeStatus::InternalError,
            output: String::new(),
            error_message: error.to_string(),
            usage: ResourceUsage::default(),
        }
    }

    fn compile_failed(compile: ExecResult, usage: ResourceUsage) -> Self {
        let diagnostic = if compile.stderr.is_empty() {
            compile.stdout
        } else {
            compile.stderr
        };
        Self {
            status: RunTimeStatus::CompileError,
            output: String::new(),
            error_message: diagnostic,
            usage,
        }
    }

    fn timed_out(exec: ExecResult, timeout: Duration, usage: ResourceUsage) -> Self {
        let error_message = if exec.stderr.is_empty() {
            format!("execution timed out after {} ms", timeout.as_millis())
        } else {
            exec.stderr
        };
        Self {
            status: RunTimeStatus::Timeout,
            output: exec.stdout,
            error_message,
            usage,
        }
    }

    fn finished(exec: ExecResult, usage: ResourceUsage) -> Self {
        if exec.success() {
            return Self {
                status: RunTimeStatus::Success,
                output: exec.stdout,
                error_message: exec.stderr,
                usage,
            };
        }
        let mut error_message = if !exec.stderr.is_empty() {
            exec.stderr
        } else {
            match exec.exit_code {
                Some(code) => format!("process exited with code {code}"),
                None => "process was killed".to_string(),
            }
        };
        if exec.oom_killed {
            if !error_message.ends_with('\n') {
                error_message.push('\n');
            }
            error_message.push_str("memory limit exceeded");
        }
        Self {
            status: RunTimeStatus::RuntimeError,
            output: exec.stdout,
            error_message,
            usage,
        }
    }
}

/// Provisions one sandbox per job, materializes the payload, compiles and
/// runs it, and always tears the sandbox down.
pub struct SandboxRunner {
    factory: Arc<dyn SandboxFactory>,
    registry: Arc<LanguageRegistry>,
    pool: SandboxPool,
}

impl SandboxRunner {
    pub fn new(
        factory: Arc<dyn SandboxFactory>,
        registry: Arc<LanguageRegistry>,
        pool: SandboxPool,
    ) -> Self {
        Self {
            factory,
            registry,
            pool,
        }
    }

    pub fn factory(&self) -> &Arc<dyn SandboxFactory> {
        &self.factory
    }

    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    /// Run `job` under `limits`. Errors are infrastructure failures; the
    /// guest's own failures are reported through [`RunReport::status`].
    pub async fn run(&self, job: &Job, limits: &ResourceLimits) -> EngineResult<RunReport> {
        let spec = self.registry.spec(job.language())?;
        let _permit = self.pool.acquire().await?;

        let config = SandboxConfig {
            id: job.id(),
            image: spec.image.clone(),
            resources: limits.clone(),
        };
        info!(
            job_id = %job.id(),
            language = %job.language(),
            factory = self.factory.name(),
            "provisioning sandbox"
        );
        let sandbox = self.factory.create(config).await?;
        let mut lease = SandboxLease::new(Arc::clone(&self.factory), sandbox);

        let result = match lease.sandbox_mut() {
            Some(sandbox) => match sandbox.start().await {
                Ok(()) => drive(sandbox, job, spec, limits).await,
                Err(e) => Err(e.into()),
            },
            None => Err(EngineError::Internal("sandbox released early".into())),
        };

        lease.release().await;
        if let Err(e) = &result {
            error!(job_id = %job.id(), error = %e, "job failed");
        }
        result
    }
}

async fn drive(
    sandbox: &mut dyn Sandbox,
    job: &Job,
    spec: &LanguageSpec,
    limits: &ResourceLimits,
) -> EngineResult<RunReport> {
    materialize(&*sandbox, job, spec).await?;

    // Compile and run share one deadline.
    let deadline = Instant::now() + limits.timeout;

    if let Some(compile) = spec.compile_command() {
        let result = exec_until(sandbox, &compile, deadline).await?;
        if result.timed_out {
            return Ok(RunReport::timed_out(result, limits.timeout, sandbox.usage()));
        }
        if !result.success() {
            info!(job_id = %job.id(), "compilation failed");
            return Ok(RunReport::compile_failed(result, sandbox.usage()));
        }
    }

    let result = exec_until(sandbox, &spec.run_command(), deadline).await?;
    let usage = sandbox.usage();
    let report = if result.timed_out {
        RunReport::timed_out(result, limits.timeout, usage)
    } else {
        RunReport::finished(result, usage)
    };
    info!(job_id = %job.id(), status = ?report.status, "job finished");
    Ok(report)
}

async fn materialize(sandbox: &dyn Sandbox, job: &Job, spec: &LanguageSpec) -> EngineResult<()> {
    match job.payload() {
        Payload::Code(code) => sandbox.write_file(spec.source_file, code.as_bytes()).await?,
        Payload::Files(files) => {
            for file in files {
                sandbox
                    .write_file(&file.path, file.content.as_bytes())
                    .await?;
            }
        }
    }
    Ok(())
}

/// Run `argv` with whatever remains before `deadline`. A sandbox that does
/// not return within the grace period is killed and reported as timed out
/// with whatever output it had captured.
async fn exec_until(
    sandbox: &mut dyn Sandbox,
    argv: &[String],
    deadline: Instant,
) -> EngineResult<ExecResult> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Ok(ExecResult {
            timed_out: true,
            ..ExecResult::default()
        });
    }

    let request = ExecRequest {
        argv,
        timeout: remaining,
    };
    let outcome = tokio::time::timeout(remaining + KILL_GRACE, sandbox.exec(&request)).await;
    match outcome {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(id = %sandbox.id(), "sandbox ignored its deadline, killing");
            if let Err(e) = sandbox.kill().await {
                warn!(id = %sandbox.id(), error = %e, "kill failed");
            }
            let partial = sandbox.partial_output().await;
            Ok(ExecResult {
                exit_code: None,
                timed_out: true,
                ..partial
            })
        }
    }
}

/// Owns a created sandbox until it is handed back to the factory. Dropping
/// an unreleased lease (a cancelled request) still destroys the sandbox.
struct SandboxLease {
    factory: Arc<dyn SandboxFactory>,
    sandbox: Option<Box<dyn Sandbox>>,
}

impl SandboxLease {
    fn new(factory: Arc<dyn SandboxFactory>, sandbox: Box<dyn Sandbox>) -> Self {
        Self {
            factory,
            sandbox: Some(sandbox),
        }
    }

    fn sandbox_mut(&mut self) -> Option<&mut (dyn Sandbox + 'static)> {
        self.sandbox.as_deref_mut()
    }

    /// Best-effort stop, then destroy.
    async fn release(&mut self) {
        if let Some(mut sandbox) = self.sandbox.take() {
            if let Err(e) = sandbox.stop().await {
                warn!(id = %sandbox.id(), error = %e, "failed to stop sandbox");
            }
            self.factory.destroy(sandbox).await;
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        let Some(sandbox) = self.sandbox.take() else {
            return;
        };
        let factory = Arc::clone(&self.factory);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(id = %sandbox.id(), "sandbox abandoned, destroying in background");
                handle.spawn(async move {
                    factory.destroy(sandbox).await;
                });
            }
            Err(_) => error!(id = %sandbox.id(), "sandbox abandoned outside a runtime, leaking"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(code: Option<i64>, stdout: &str, stderr: &str) -> ExecResult {
        ExecResult {
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..ExecResult::default()
        }
    }

    #[test]
    fn success_keeps_both_streams() {
        let report = RunReport::finished(exec(Some(0), "out", "warn"), ResourceUsage::default());
        assert_eq!(report.status, RunTimeStatus::Success);
        assert_eq!(report.output, "out");
        assert_eq!(report.error_message, "warn");
    }

    #[test]
    fn nonzero_exit_without_stderr_names_the_code() {
        let report = RunReport::finished(exec(Some(2), "partial", ""), ResourceUsage::default());
        assert_eq!(report.status, RunTimeStatus::RuntimeError);
        assert_eq!(report.output, "partial");
        assert_eq!(report.error_message, "process exited with code 2");
    }

    #[test]
    fn oom_is_appended_to_diagnostic() {
        let mut result = exec(Some(137), "", "Killed");
        result.oom_killed = true;
        let report = RunReport::finished(result, ResourceUsage::default());
        assert_eq!(report.error_message, "Killed\nmemory limit exceeded");
    }

    #[test]
    fn compile_diagnostic_falls_back_to_stdout() {
        let report =
            RunReport::compile_failed(exec(Some(1), "main.go:3: undefined", ""), ResourceUsage::default());
        assert_eq!(report.status, RunTimeStatus::CompileError);
        assert_eq!(report.error_message, "main.go:3: undefined");
        assert_eq!(report.output, "");
    }

    #[test]
    fn timeout_without_stderr_mentions_limit() {
        let mut result = exec(None, "tick\n", "");
        result.timed_out = true;
        let report = RunReport::timed_out(result, Duration::from_millis(1500), ResourceUsage::default());
        assert_eq!(report.status, RunTimeStatus::Timeout);
        assert_eq!(report.output, "tick\n");
        assert_eq!(report.error_message, "execution timed out after 1500 ms");
    }
}
