use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::resource::{Resource, setrlimit};
use sandbox::{OutputBuffer, ResourceLimits, ResourceUsage};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Kernel clock ticks per second used by `/proc/<pid>/stat` (USER_HZ).
const USER_HZ: u64 = 100;

/// Environment variable carrying the sandbox id into every guest process.
pub(crate) const SANDBOX_ENV: &str = "RCE_SANDBOX";

/// Capture buffer shared between a drain task and the sandbox.
pub(crate) type SharedOutput = Arc<Mutex<OutputBuffer>>;

/// Kill the entire process group led by `pid` via `killpg(SIGKILL)`.
///
/// Requires the child to have been spawned with `process_group(0)` so that its
/// PGID equals its PID. No-op if the group is already gone or the PID cannot
/// be represented as `i32`.
pub(crate) fn kill_process_group(pid: u32) {
    if let Ok(pid) = i32::try_from(pid) {
        let pgid = nix::unistd::Pid::from_raw(pid);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

/// Kills the guest's process group when dropped, so background children and
/// cancelled executions never outlive the command that started them.
pub(crate) struct ProcessGroupGuard(Option<u32>);

impl ProcessGroupGuard {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        Self(pid)
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.0.take() {
            kill_process_group(pid);
        }
    }
}

/// Resource limits applied in the child between `fork` and `exec`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RlimitPlan {
    cpu_secs: u64,
    address_space: Option<u64>,
}

impl RlimitPlan {
    pub(crate) fn new(limits: &ResourceLimits, limit_address_space: bool) -> Self {
        // CPU seconds scale with the share of a core the job may use; one
        // extra second keeps the wall-clock timeout the first to fire.
        let wall = limits.timeout.as_secs_f64().ceil();
        let share = f64::from(limits.cpu_millicores.max(1)) / 1000.0;
        let cpu_secs = (wall * share).ceil() as u64 + 1;
        Self {
            cpu_secs,
            address_space: limit_address_space.then(|| limits.memory_bytes()),
        }
    }

    pub(crate) fn cpu_secs(&self) -> u64 {
        self.cpu_secs
    }

    /// Runs in the forked child: only async-signal-safe calls allowed.
    pub(crate) fn apply(&self) -> std::io::Result<()> {
        setrlimit(Resource::RLIMIT_CPU, self.cpu_secs, self.cpu_secs)
            .map_err(std::io::Error::from)?;
        setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(std::io::Error::from)?;
        if let Some(bytes) = self.address_space {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(std::io::Error::from)?;
        }
        Ok(())
    }
}

/// Read a stream to EOF into `sink`, which keeps at most its limit.
pub(crate) async fn drain<R>(reader: Option<R>, sink: SharedOutput)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let (Some(read), Ok(mut sink)) = (chunk.get(..n), sink.lock()) {
                    sink.push(read);
                }
            }
        }
    }
}

pub(crate) fn snapshot(output: &SharedOutput) -> String {
    output.lock().map(|o| o.snapshot()).unwrap_or_default()
}

/// SIGKILL every process whose environment carries `RCE_SANDBOX=<id>`.
///
/// Catches guests that left their process group with `setsid()` or
/// `setpgid()`. A guest that re-execs with a scrubbed environment, or runs
/// as another user, is not found: this backend is not an isolation
/// boundary. Returns the number of processes signalled.
pub(crate) async fn kill_tagged(id: &str) -> usize {
    let tag = format!("{SANDBOX_ENV}={id}");
    let Ok(mut entries) = tokio::fs::read_dir("/proc").await else {
        return 0;
    };
    let mut killed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(environ) = tokio::fs::read(entry.path().join("environ")).await else {
            continue;
        };
        if environ.split(|b| *b == 0).any(|var| var == tag.as_bytes()) {
            let target = nix::unistd::Pid::from_raw(pid);
            if nix::sys::signal::kill(target, nix::sys::signal::Signal::SIGKILL).is_ok() {
                killed += 1;
            }
        }
    }
    killed
}

/// Sample peak RSS and CPU time of a live process from procfs.
pub(crate) async fn sample_proc(pid: u32) -> Option<ResourceUsage> {
    let status = tokio::fs::read_to_string(format!("/proc/{pid}/status"))
        .await
        .ok()?;
    let stat = tokio::fs::read_to_string(format!("/proc/{pid}/stat"))
        .await
        .ok()?;
    Some(ResourceUsage {
        peak_memory_bytes: parse_vm_hwm(&status),
        cpu_time: parse_cpu_ticks(&stat).map(|ticks| Duration::from_millis(ticks * 1000 / USER_HZ)),
    })
}

/// `VmHWM:     1234 kB` → bytes.
fn parse_vm_hwm(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// utime + stime from `/proc/<pid>/stat`. The command name (field 2) may
/// contain spaces, so fields are counted after the closing parenthesis.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    // rest starts at field 3 (state); utime is field 14, stime field 15.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}
