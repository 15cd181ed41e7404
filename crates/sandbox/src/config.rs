use std::time::Duration;

/// Ceilings applied to every command a sandbox runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU share in thousandths of a core (1000 = one full core).
    pub cpu_millicores: u32,
    pub memory_mb: u32,
    /// Wall-clock budget for the whole job (compile + run).
    pub timeout: Duration,
    /// Per-stream capture cap; bytes past it are discarded.
    pub max_output_bytes: usize,
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> u64 {
        u64::from(self.memory_mb) * 1024 * 1024
    }

    /// CPU ceiling expressed in Docker's nano-CPU unit.
    pub fn nano_cpus(&self) -> i64 {
        i64::from(self.cpu_millicores) * 1_000_000
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millicores: 1000,
            memory_mb: 256,
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024 * 1024,
        }
    }
}

pub struct SandboxConfig {
    pub id: uuid::Uuid,
    /// Image reference the environment is instantiated from.
    pub image: String,
    pub resources: ResourceLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_bytes_converts_mebibytes() {
        let limits = ResourceLimits {
            memory_mb: 256,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.memory_bytes(), 268_435_456);
    }

    #[test]
    fn nano_cpus_half_core() {
        let limits = ResourceLimits {
            cpu_millicores: 500,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.nano_cpus(), 500_000_000);
    }
}
