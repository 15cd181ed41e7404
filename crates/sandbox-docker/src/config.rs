use std::path::PathBuf;

/// Mount point of the per-job workspace inside every container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Host directory holding per-sandbox workspaces. Must be visible to the
    /// Docker daemon at the same path (bind-mounted into containers).
    pub base_dir: PathBuf,
    /// `user[:group]` the guest runs as; `None` keeps the image default.
    pub user: Option<String>,
    /// Maximum number of processes inside one container.
    pub pids_limit: i64,
}

impl DockerConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            user: Some("65534:65534".to_string()),
            pids_limit: 64,
        }
    }
}
