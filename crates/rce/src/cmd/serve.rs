use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio::net::TcpListener;
use tracing::info;

use super::{Service, load_config};
use crate::config::{MetricsBackend, RceConfig};
use crate::error::{AppError, AppResult};
use crate::server;

#[derive(Args)]
pub struct ServeArgs {
    /// Path to rce.yaml config file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Listen address (overrides config)
    #[arg(long, env = "RCE_LISTEN")]
    listen: Option<String>,
    /// Metrics service URL; switches metrics to the http backend
    #[arg(long, env = "RCE_METRICS_URL")]
    metrics_url: Option<String>,
    /// Metrics service bearer token
    #[arg(long, env = "RCE_METRICS_TOKEN")]
    metrics_token: Option<String>,
}

impl ServeArgs {
    fn apply(self, config: &mut RceConfig) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(url) = self.metrics_url {
            config.metrics.backend = MetricsBackend::Http;
            config.metrics.url = Some(url);
        }
        if let Some(token) = self.metrics_token {
            config.metrics.token = Some(token);
        }
    }
}

/// Load config and serve the HTTP API until SIGTERM / SIGINT.
pub async fn run_serve(args: ServeArgs) -> AppResult<()> {
    let mut config = load_config(args.config.as_deref()).await?;
    args.apply(&mut config);
    config.validate()?;
    let addr = config.listen_addr()?;

    let service = Service::start(&config).await?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Server(format!("bind {addr}: {e}")))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, server::router(Arc::clone(&service.engine)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Server(e.to_string()))?;

    service.shutdown().await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();
    tokio::select! {
        _ = recv_signal(&mut sigterm) => info!("received SIGTERM, draining"),
        _ = recv_signal(&mut sigint) => info!("received SIGINT, draining"),
    }
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
