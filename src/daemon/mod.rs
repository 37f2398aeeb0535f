//! Daemon bootstrap and host-level lifecycle.
//!
//! Startup order: configuration, step registry (built-ins, then
//! extensions), stored workloads, autostart, HTTP listener. SIGHUP
//! reloads configuration only; SIGTERM and SIGINT stop every workload
//! with a bounded wait and then end the process.

pub mod routes;
pub mod signals;

use anyhow::{Context, Result};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

use crate::config::{ConfigLoader, DaemonConfig};
use crate::environment::EnvironmentRegistry;
use crate::operations::extensions::load_extensions;
use crate::operations::{install_registry, Downloader, OperationRegistry};
use crate::workload::{FileDefinitionStore, WorkloadRegistry};

pub use routes::{router, AppState};

/// Built-in step kinds plus the extensions found under `modules_dir`
pub fn build_operations(config: &DaemonConfig) -> OperationRegistry {
    let downloader = Arc::new(Downloader::new(config.cache_dir.clone()));
    let mut builder = OperationRegistry::builder().with_builtin(downloader);
    let extensions = load_extensions(&mut builder, &config.modules_dir);
    info!("Registered {} operation extensions", extensions);
    builder.build()
}

/// Everything the daemon serves, wired together
pub struct Daemon {
    registry: Arc<WorkloadRegistry>,
}

impl Daemon {
    /// Load stored workloads and prepare the registry
    pub async fn bootstrap(config: &DaemonConfig, operations: Arc<OperationRegistry>) -> Result<Self> {
        let environments = EnvironmentRegistry::with_builtin(
            config.console.clone(),
            config.stats_sample_window,
        );
        info!("Supported environments: {}", environments.supported().join(", "));

        let registry = Arc::new(WorkloadRegistry::new(
            Arc::new(FileDefinitionStore::new(&config.definitions_dir)),
            Arc::new(environments),
            operations,
            &config.data_dir,
            config.shutdown_timeout,
        ));
        registry
            .load_all()
            .await
            .context("Failed to load workload definitions")?;

        Ok(Self { registry })
    }

    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.registry
    }

    pub fn router(&self) -> Router {
        router(AppState {
            registry: Arc::clone(&self.registry),
        })
    }

    /// Announce startup in each enabled console, then autostart
    pub async fn start_workloads(&self) {
        for workload in self.registry.list().await {
            if workload.definition().enabled {
                workload
                    .environment()
                    .display_to_console("Daemon has been started\n");
            }
        }
        self.registry.start_autostart().await;
    }
}

/// Run the daemon until SIGTERM or SIGINT
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let loader = Arc::new(
        ConfigLoader::load(config_path)
            .await
            .context("Failed to load configuration")?,
    );
    let config = loader.get_config();

    let operations = install_registry(build_operations(&config))
        .context("Operation registry already installed")?;
    info!("Step kinds: {}", operations.kinds().join(", "));

    let daemon = Daemon::bootstrap(&config, operations).await?;
    daemon.start_workloads().await;

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on {}", address);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(handle_signals(
        Arc::clone(&loader),
        Arc::clone(daemon.registry()),
        shutdown_tx,
    ));

    axum::serve(listener, daemon.router())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server failed")?;

    signal_task.await.context("Signal task panicked")??;
    info!("Daemon stopped");
    Ok(())
}

async fn handle_signals(
    loader: Arc<ConfigLoader>,
    registry: Arc<WorkloadRegistry>,
    shutdown: watch::Sender<bool>,
) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("Cannot listen for SIGHUP")?;
    let mut terminate = signal(SignalKind::terminate()).context("Cannot listen for SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("Cannot listen for SIGINT")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                loader.reload().await;
            }
            _ = terminate.recv() => break,
            _ = interrupt.recv() => break,
        }
    }

    let timeout = loader.get_config().shutdown_timeout;
    info!("Shutting down, waiting up to {:?} for workloads", timeout);
    registry.shutdown_all(timeout).await;
    let _ = shutdown.send(true);
    Ok(())
}
