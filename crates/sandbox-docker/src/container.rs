use std::path::Path;
use std::time::Duration;

use bollard::models::{ContainerCreateBody, ContainerStatsResponse, HostConfig};
use sandbox::{ResourceLimits, ResourceUsage};

use crate::config::{CONTAINER_WORKDIR, DockerConfig};

/// Build the create body for one guest command. The container has no
/// network, no capabilities, and sees only the job workspace.
pub(crate) fn create_body(
    image: &str,
    argv: &[String],
    workspace: &Path,
    limits: &ResourceLimits,
    config: &DockerConfig,
) -> ContainerCreateBody {
    let memory = i64::try_from(limits.memory_bytes()).unwrap_or(i64::MAX);
    ContainerCreateBody {
        image: Some(image.to_string()),
        cmd: Some(argv.to_vec()),
        working_dir: Some(CONTAINER_WORKDIR.to_string()),
        user: config.user.clone(),
        network_disabled: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(HostConfig {
            binds: Some(vec![format!(
                "{}:{CONTAINER_WORKDIR}",
                workspace.display()
            )]),
            memory: Some(memory),
            // Equal to `memory`: no swap on top of the ceiling.
            memory_swap: Some(memory),
            nano_cpus: Some(limits.nano_cpus()),
            pids_limit: Some(config.pids_limit),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            auto_remove: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fold one stats sample into `usage`. Memory keeps the peak; CPU total is
/// cumulative per container, so the latest non-zero sample wins.
pub(crate) fn observe(usage: &mut ResourceUsage, sample: &ContainerStatsResponse) {
    let memory = sample
        .memory_stats
        .as_ref()
        .and_then(|m| m.max_usage.or(m.usage))
        .filter(|bytes| *bytes > 0);
    if let Some(bytes) = memory {
        usage.peak_memory_bytes = Some(usage.peak_memory_bytes.map_or(bytes, |p| p.max(bytes)));
    }

    let cpu = sample
        .cpu_stats
        .as_ref()
        .and_then(|c| c.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .filter(|nanos| *nanos > 0);
    if let Some(nanos) = cpu {
        usage.cpu_time = Some(Duration::from_nanos(nanos));
    }
}

/// Container name for the `seq`-th command of sandbox `id`.
pub(crate) fn container_name(id: &str, seq: u32) -> String {
    format!("rce-{id}-{seq}")
}
