use std::path::PathBuf;

/// Default `PATH` handed to guest processes.
pub const DEFAULT_PATH_ENV: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Base directory for per-sandbox workspaces.
    pub base_dir: PathBuf,
    /// Apply the memory ceiling as `RLIMIT_AS`. Off by default: runtimes
    /// that reserve large virtual ranges up front (JVM, V8, Go) fail to
    /// start under an address-space cap sized for resident memory.
    pub limit_address_space: bool,
    /// `PATH` used both to resolve commands and inside the guest.
    pub path_env: String,
}

impl ProcessConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            limit_address_space: false,
            path_env: DEFAULT_PATH_ENV.to_string(),
        }
    }
}
