use std::time::{Duration, Instant};

use sandbox::{ExecRequest, ResourceLimits, SandboxConfig, SandboxError, SandboxFactory};
use sandbox_process::{ProcessConfig, ProcessFactory};

async fn started_factory(dir: &tempfile::TempDir) -> ProcessFactory {
    let mut factory = ProcessFactory::new(ProcessConfig::new(dir.path().to_path_buf()));
    factory.startup().await.unwrap();
    factory
}

fn config(timeout: Duration) -> SandboxConfig {
    SandboxConfig {
        id: uuid::Uuid::new_v4(),
        image: "host".into(),
        resources: ResourceLimits {
            timeout,
            ..ResourceLimits::default()
        },
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Live processes whose environment carries this sandbox's tag.
fn tagged_processes(id: &str) -> usize {
    let tag = format!("RCE_SANDBOX={id}");
    std::fs::read_dir("/proc")
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_str().is_some_and(|n| n.parse::<u32>().is_ok()))
        .filter(|e| {
            std::fs::read(e.path().join("environ"))
                .is_ok_and(|env| env.split(|b| *b == 0).any(|var| var == tag.as_bytes()))
        })
        .count()
}

#[tokio::test]
async fn exec_captures_streams_separately() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    let cmd = argv(&["sh", "-c", "printf hello; printf oops >&2; exit 3"]);
    let result = sandbox
        .exec(&ExecRequest {
            argv: &cmd,
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();

    assert_eq!(result.stdout, "hello");
    assert_eq!(result.stderr, "oops");
    assert_eq!(result.exit_code, Some(3));
    assert!(!result.timed_out);

    factory.destroy(sandbox).await;
}

#[tokio::test]
async fn exec_times_out_and_keeps_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    let cmd = argv(&["sh", "-c", "echo partial; while :; do :; done"]);
    let started = Instant::now();
    let result = sandbox
        .exec(&ExecRequest {
            argv: &cmd,
            timeout: Duration::from_millis(300),
        })
        .await
        .unwrap();

    assert!(result.timed_out);
    assert_eq!(result.stdout, "partial\n");
    assert!(started.elapsed() < Duration::from_secs(3));

    factory.destroy(sandbox).await;
}

#[tokio::test]
async fn write_file_creates_nested_paths() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    sandbox.write_file("a/b.txt", b"nested").await.unwrap();
    let cmd = argv(&["cat", "a/b.txt"]);
    let result = sandbox
        .exec(&ExecRequest {
            argv: &cmd,
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();
    assert_eq!(result.stdout, "nested");

    factory.destroy(sandbox).await;
}

#[tokio::test]
async fn write_file_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    let err = sandbox.write_file("../escape.txt", b"x").await.unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPath(_)));
    assert!(!dir.path().join("workspaces/escape.txt").exists());

    factory.destroy(sandbox).await;
}

#[tokio::test]
async fn destroy_removes_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let cfg = config(Duration::from_secs(5));
    let workspace = factory.paths().workspace(&cfg.id.to_string());
    let mut sandbox = factory.create(cfg).await.unwrap();
    sandbox.start().await.unwrap();
    sandbox.write_file("main.py", b"print(1)").await.unwrap();
    assert!(workspace.exists());

    factory.destroy(sandbox).await;
    assert!(!workspace.exists());
}

#[tokio::test]
async fn missing_program_is_exec_failure() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    let cmd = argv(&["definitely-not-a-real-toolchain"]);
    let err = sandbox
        .exec(&ExecRequest {
            argv: &cmd,
            timeout: Duration::from_secs(1),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::ExecFailed(_)));

    factory.destroy(sandbox).await;
}

#[tokio::test]
async fn create_before_startup_fails() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ProcessFactory::new(ProcessConfig::new(dir.path().to_path_buf()));
    let err = factory.create(config(Duration::from_secs(1))).await.err().unwrap();
    assert!(matches!(err, SandboxError::CreationFailed(_)));
}

#[tokio::test]
async fn setsid_child_is_reaped_and_exec_returns() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    let cmd = argv(&["sh", "-c", "setsid sleep 100 & echo started"]);
    let started = Instant::now();
    let result = sandbox
        .exec(&ExecRequest {
            argv: &cmd,
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.stdout, "started\n");
    assert_eq!(result.exit_code, Some(0));
    assert!(!result.timed_out);

    let id = sandbox.id().to_string();
    let mut remaining = tagged_processes(&id);
    for _ in 0..40 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        remaining = tagged_processes(&id);
    }
    assert_eq!(remaining, 0, "setsid child survived its command");

    factory.destroy(sandbox).await;
}

#[tokio::test]
async fn abandoned_exec_output_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let factory = started_factory(&dir).await;
    let mut sandbox = factory.create(config(Duration::from_secs(5))).await.unwrap();
    sandbox.start().await.unwrap();

    let cmd = argv(&["sh", "-c", "echo early; echo warn >&2; sleep 100"]);
    let request = ExecRequest {
        argv: &cmd,
        timeout: Duration::from_secs(30),
    };
    let abandoned = tokio::time::timeout(Duration::from_millis(500), sandbox.exec(&request)).await;
    assert!(abandoned.is_err());

    sandbox.kill().await.unwrap();
    let partial = sandbox.partial_output().await;
    assert_eq!(partial.stdout, "early\n");
    assert_eq!(partial.stderr, "warn\n");

    factory.destroy(sandbox).await;
}
