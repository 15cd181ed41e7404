#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rce_engine::{ExecutionEngine, LanguageRegistry, SandboxPool, SandboxRunner};
use sandbox::{
    ExecRequest, ExecResult, ResourceLimits, ResourceUsage, Sandbox, SandboxConfig, SandboxError,
    SandboxFactory,
};

/// What a fake sandbox does when asked to run a command.
#[derive(Debug, Clone)]
pub enum Behavior {
    Exit {
        code: i64,
        stdout: &'static str,
        stderr: &'static str,
    },
    /// Sleep, then exit 0 with `stdout`.
    Slow(Duration, &'static str),
    /// Honor the request timeout, returning partial output.
    Hang,
    /// Never return, even past the timeout.
    Unresponsive,
    /// Spend `delay` getting ready (a slow container start), print `stdout`,
    /// then honor the request timeout.
    SlowStart(Duration, &'static str),
}

pub type Script = Arc<dyn Fn(&[String]) -> Behavior + Send + Sync>;

pub fn always(behavior: Behavior) -> Script {
    Arc::new(move |_| behavior.clone())
}

pub fn exit(code: i64, stdout: &'static str, stderr: &'static str) -> Behavior {
    Behavior::Exit {
        code,
        stdout,
        stderr,
    }
}

#[derive(Default)]
pub struct Stats {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub killed: AtomicUsize,
    pub files: Mutex<Vec<String>>,
    pub commands: Mutex<Vec<Vec<String>>>,
    pub images: Mutex<Vec<String>>,
}

impl Stats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn files(&self) -> Vec<String> {
        self.files.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

pub struct FakeFactory {
    pub stats: Arc<Stats>,
    script: Script,
    fail_create: bool,
    fail_start: bool,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            stats: Arc::new(Stats::default()),
            script,
            fail_create: false,
            fail_start: false,
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait]
impl SandboxFactory for FakeFactory {
    fn name(&self) -> &str {
        "fake"
    }

    async fn startup(&mut self) -> sandbox::Result<()> {
        Ok(())
    }

    async fn create(&self, config: SandboxConfig) -> sandbox::Result<Box<dyn Sandbox>> {
        if self.fail_create {
            return Err(SandboxError::CreationFailed("no capacity".into()));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        self.stats.images.lock().unwrap().push(config.image.clone());
        Ok(Box::new(FakeSandbox {
            id: config.id.to_string(),
            stats: Arc::clone(&self.stats),
            script: Arc::clone(&self.script),
            fail_start: self.fail_start,
            captured: Mutex::new(String::new()),
        }))
    }

    async fn destroy(&self, _sandbox: Box<dyn Sandbox>) {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    async fn shutdown(&mut self) {}
}

pub struct FakeSandbox {
    id: String,
    stats: Arc<Stats>,
    script: Script,
    fail_start: bool,
    /// Stdout "printed" so far by the latest command.
    captured: Mutex<String>,
}

impl FakeSandbox {
    fn print(&self, text: &str) {
        self.captured.lock().unwrap().push_str(text);
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&mut self) -> sandbox::Result<()> {
        if self.fail_start {
            return Err(SandboxError::StartFailed("image not available".into()));
        }
        Ok(())
    }

    async fn stop(&mut self) -> sandbox::Result<()> {
        Ok(())
    }

    async fn kill(&mut self) -> sandbox::Result<()> {
        self.stats.killed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_file(&self, path: &str, _content: &[u8]) -> sandbox::Result<()> {
        sandbox::workspace_path(Path::new("/sandbox"), path)?;
        self.stats.files.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn exec(&self, request: &ExecRequest<'_>) -> sandbox::Result<ExecResult> {
        self.stats.commands.lock().unwrap().push(request.argv.to_vec());
        self.captured.lock().unwrap().clear();
        match (self.script)(request.argv) {
            Behavior::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ExecResult {
                exit_code: Some(code),
                stdout: stdout.into(),
                stderr: stderr.into(),
                ..ExecResult::default()
            }),
            Behavior::Slow(delay, stdout) => {
                tokio::time::sleep(delay).await;
                Ok(ExecResult {
                    exit_code: Some(0),
                    stdout: stdout.into(),
                    ..ExecResult::default()
                })
            }
            Behavior::Hang => {
                self.print("partial");
                tokio::time::sleep(request.timeout).await;
                Ok(ExecResult {
                    stdout: "partial".into(),
                    timed_out: true,
                    ..ExecResult::default()
                })
            }
            Behavior::Unresponsive => std::future::pending().await,
            Behavior::SlowStart(delay, stdout) => {
                tokio::time::sleep(delay).await;
                self.print(stdout);
                tokio::time::sleep(request.timeout).await;
                Ok(ExecResult {
                    stdout: stdout.into(),
                    timed_out: true,
                    ..ExecResult::default()
                })
            }
        }
    }

    async fn partial_output(&self) -> ExecResult {
        ExecResult {
            stdout: self.captured.lock().unwrap().clone(),
            ..ExecResult::default()
        }
    }

    fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            peak_memory_bytes: Some(1024),
            cpu_time: Some(Duration::from_millis(7)),
        }
    }
}

pub struct Harness {
    pub engine: ExecutionEngine,
    pub stats: Arc<Stats>,
}

pub fn limits(timeout: Duration) -> ResourceLimits {
    ResourceLimits {
        timeout,
        ..ResourceLimits::default()
    }
}

pub fn harness(factory: FakeFactory, limits: ResourceLimits, pool: SandboxPool) -> Harness {
    harness_with_registry(factory, limits, pool, LanguageRegistry::default())
}

pub fn harness_with_registry(
    factory: FakeFactory,
    limits: ResourceLimits,
    pool: SandboxPool,
    registry: LanguageRegistry,
) -> Harness {
    let stats = Arc::clone(&factory.stats);
    let registry = Arc::new(registry);
    let runner = SandboxRunner::new(Arc::new(factory), Arc::clone(&registry), pool);
    Harness {
        engine: ExecutionEngine::new(registry, runner, limits),
        stats,
    }
}

pub fn default_harness(script: Script) -> Harness {
    harness(
        FakeFactory::new(script),
        limits(Duration::from_secs(5)),
        SandboxPool::new(4, Duration::from_secs(1)),
    )
}
