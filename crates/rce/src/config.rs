use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rce_engine::{Language, LanguageOverride};
use sandbox::ResourceLimits;
use sandbox_docker::DockerConfig;
use sandbox_process::ProcessConfig;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

pub(crate) const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_MEMORY_MB: u32 = 256;
pub(crate) const DEFAULT_CPU_MILLICORES: u32 = 1000;
pub(crate) const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub(crate) const DEFAULT_MAX_CONCURRENT: usize = 4;
pub(crate) const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_METRICS_CAPACITY: usize = 1000;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub docker: DockerSection,
    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub languages: HashMap<Language, LanguageOverride>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Docker,
    Process,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerSection {
    pub base_dir: PathBuf,
    pub user: Option<String>,
    pub pids_limit: i64,
}

impl Default for DockerSection {
    fn default() -> Self {
        let defaults = DockerConfig::new(PathBuf::from("/var/lib/rce"));
        Self {
            base_dir: defaults.base_dir,
            user: defaults.user,
            pids_limit: defaults.pids_limit,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessSection {
    pub base_dir: PathBuf,
    pub limit_address_space: bool,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("rce"),
            limit_address_space: false,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub timeout_ms: u64,
    pub memory_mb: u32,
    pub cpu_millicores: u32,
    pub max_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            memory_mb: DEFAULT_MEMORY_MB,
            cpu_millicores: DEFAULT_CPU_MILLICORES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub max_concurrent: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    #[default]
    None,
    Memory,
    Http,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub backend: MetricsBackend,
    /// Base URL of the metrics service (`http` backend).
    pub url: Option<String>,
    pub token: Option<String>,
    /// Records kept by the `memory` backend.
    pub capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            backend: MetricsBackend::None,
            url: None,
            token: None,
            capacity: DEFAULT_METRICS_CAPACITY,
        }
    }
}

/// Load an rce config from a YAML file.
///
/// Relative paths in the config are resolved against the config file's parent directory.
pub async fn load(path: &Path) -> AppResult<RceConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: RceConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| AppError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    Ok(config)
}

impl RceConfig {
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = config_dir.join(&*p);
            }
        };
        resolve(&mut self.docker.base_dir);
        resolve(&mut self.process.base_dir);
    }

    /// Check values that serde cannot. Call after CLI / env overrides.
    pub fn validate(&self) -> AppResult<()> {
        self.listen_addr()?;
        if self.limits.timeout_ms == 0 {
            return Err(AppError::Config("limits.timeout_ms must be positive".into()));
        }
        if self.limits.memory_mb == 0 {
            return Err(AppError::Config("limits.memory_mb must be positive".into()));
        }
        if self.limits.cpu_millicores == 0 {
            return Err(AppError::Config(
                "limits.cpu_millicores must be positive".into(),
            ));
        }
        if self.limits.max_output_bytes == 0 {
            return Err(AppError::Config(
                "limits.max_output_bytes must be positive".into(),
            ));
        }
        if self.pool.max_concurrent == 0 {
            return Err(AppError::Config("pool.max_concurrent must be positive".into()));
        }
        if self.metrics.backend == MetricsBackend::Http
            && self.metrics.url.as_deref().is_none_or(str::is_empty)
        {
            return Err(AppError::Config(
                "metrics.url is required for the http backend (set in config or via RCE_METRICS_URL)"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> AppResult<SocketAddr> {
        self.server
            .listen
            .parse()
            .map_err(|e| AppError::Config(format!("server.listen {:?}: {e}", self.server.listen)))
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_millicores: self.limits.cpu_millicores,
            memory_mb: self.limits.memory_mb,
            timeout: Duration::from_millis(self.limits.timeout_ms),
            max_output_bytes: self.limits.max_output_bytes,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.acquire_timeout_ms)
    }

    pub fn docker_config(&self) -> DockerConfig {
        DockerConfig {
            base_dir: self.docker.base_dir.clone(),
            user: self.docker.user.clone(),
            pids_limit: self.docker.pids_limit,
        }
    }

    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            limit_address_space: self.process.limit_address_space,
            ..ProcessConfig::new(self.process.base_dir.clone())
        }
    }
}
