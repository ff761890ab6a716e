//! isle server entry point.
//!
//! ## Usage
//!
//! - `isle-server` - Serve the HTTP API
//! - `isle-server --init` - Prepare the host datasets and base image, then exit

use isle_core::{
    CommandRunner, Filesystem, HostInitializer, JailManager, Orchestrator, SystemRunner,
    ZfsFilesystem,
};
use isle_server::{http, AppState, ServerConfig};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("isle_server=info".parse()?)
                .add_directive("isle_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting isle server");

    let mut config = ServerConfig::load()?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    if config.host.release.is_empty() {
        let output = runner.run_checked("uname", &["-r".to_string()]).await?;
        config.host.release = output.stdout_lossy().trim().to_string();
    }
    tracing::info!(addr = %config.http_addr, host = ?config.host, "Configuration loaded");

    if config.admin_token.is_empty() {
        tracing::warn!("ISLE_ADMIN_TOKEN not set, admin API disabled");
    }

    if std::env::args().any(|arg| arg == "--init") {
        let fs: Arc<dyn Filesystem> =
            Arc::new(ZfsFilesystem::new(config.host.clone(), runner.clone()));
        let jails = Arc::new(JailManager::new(config.host.clone(), fs.clone(), runner));
        HostInitializer::new(jails, fs).initialize().await?;
        tracing::info!("Host initialized");
        return Ok(());
    }

    let orchestrator = Orchestrator::from_config(config.host.clone(), runner)?;
    let state = AppState::new(
        orchestrator.clone(),
        config.admin_token.clone(),
        config.admin_token_header.clone(),
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Received shutdown signal");
    };

    http::serve(state, config.http_addr, shutdown).await?;

    let stats = orchestrator.pool().stats();
    tracing::info!(
        allocated = stats.allocated(),
        released = stats.released(),
        exhausted = stats.exhausted(),
        cached_binaries = orchestrator.cache().len(),
        "Server shutdown complete"
    );
    Ok(())
}
