use std::time::Duration;

pub struct ExecRequest<'a> {
    /// Program and arguments; never passed through a host shell.
    pub argv: &'a [String],
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// `None` when the process was killed before reporting an exit code.
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub oom_killed: bool,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Best-effort usage samples. Missing values are not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub peak_memory_bytes: Option<u64>,
    pub cpu_time: Option<Duration>,
}

impl ResourceUsage {
    /// Fold another sample in: keep the larger memory peak, add CPU time.
    pub fn merge(&mut self, other: ResourceUsage) {
        self.peak_memory_bytes = match (self.peak_memory_bytes, other.peak_memory_bytes) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.cpu_time = match (self.cpu_time, other.cpu_time) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }
}
