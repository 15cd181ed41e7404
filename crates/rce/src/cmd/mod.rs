mod languages;
mod run;
mod serve;

pub use languages::{LanguagesArgs, run_languages};
pub use run::{RunArgs, run_once};
pub use serve::{ServeArgs, run_serve};

use std::path::Path;
use std::sync::Arc;

use rce_engine::metrics::{HttpMetricsRecorder, MemoryMetricsStore};
use rce_engine::{ExecutionEngine, LanguageRegistry, MetricsRecorder, SandboxPool, SandboxRunner};
use sandbox::SandboxFactory;
use sandbox_docker::DockerFactory;
use sandbox_process::ProcessFactory;
use tracing::{info, warn};

use crate::config::{self, Backend, MetricsBackend, RceConfig};
use crate::error::{AppError, AppResult};

/// Load `path` if given, otherwise start from defaults.
async fn load_config(path: Option<&Path>) -> AppResult<RceConfig> {
    match path {
        Some(path) => config::load(path).await,
        None => Ok(RceConfig::default()),
    }
}

/// A started factory plus the engine driving it.
pub(crate) struct Service {
    pub engine: Arc<ExecutionEngine>,
    factory: Arc<dyn SandboxFactory>,
}

impl Service {
    pub async fn start(config: &RceConfig) -> AppResult<Self> {
        let mut factory: Box<dyn SandboxFactory> = match config.backend {
            Backend::Docker => Box::new(DockerFactory::new(config.docker_config())?),
            Backend::Process => Box::new(ProcessFactory::new(config.process_config())),
        };
        factory.startup().await?;
        let factory: Arc<dyn SandboxFactory> = Arc::from(factory);

        let registry = Arc::new(LanguageRegistry::new(&config.languages));
        let pool = SandboxPool::new(config.pool.max_concurrent, config.acquire_timeout());
        let runner = SandboxRunner::new(Arc::clone(&factory), Arc::clone(&registry), pool);
        let mut engine = ExecutionEngine::new(registry, runner, config.resource_limits());
        if let Some(recorder) = metrics_recorder(config).await? {
            info!(backend = recorder.name(), "metrics enabled");
            engine = engine.with_metrics(recorder);
        }

        info!(
            backend = factory.name(),
            max_concurrent = config.pool.max_concurrent,
            timeout_ms = config.limits.timeout_ms,
            "engine ready"
        );
        Ok(Self {
            engine: Arc::new(engine),
            factory,
        })
    }

    /// Drop the engine and shut the factory down. Every other holder of the
    /// engine (router state, in-flight requests) must be gone.
    pub async fn shutdown(self) -> AppResult<()> {
        let Self {
            engine,
            mut factory,
        } = self;
        drop(engine);

        info!("shutting down factory");
        let factory = Arc::get_mut(&mut factory)
            .ok_or_else(|| AppError::Internal("factory still referenced at shutdown".into()))?;
        factory.shutdown().await;
        Ok(())
    }
}

async fn metrics_recorder(config: &RceConfig) -> AppResult<Option<Arc<dyn MetricsRecorder>>> {
    let recorder: Arc<dyn MetricsRecorder> = match config.metrics.backend {
        MetricsBackend::None => return Ok(None),
        MetricsBackend::Memory => Arc::new(MemoryMetricsStore::new(config.metrics.capacity)),
        MetricsBackend::Http => {
            let url = config
                .metrics
                .url
                .as_deref()
                .ok_or_else(|| AppError::Config("metrics.url is required".into()))?;
            let recorder = HttpMetricsRecorder::new(url, config.metrics.token.clone())?;
            // An unreachable service is not fatal: records are skipped until
            // it answers again.
            if let Err(e) = recorder.ping().await {
                warn!(url, error = %e, "metrics service not reachable at startup");
            }
            Arc::new(recorder)
        }
    };
    Ok(Some(recorder))
}
