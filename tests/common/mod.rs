//! Common test utilities and helpers

#![allow(dead_code)]

use paddock::config::DaemonConfig;
use paddock::daemon::{build_operations, Daemon};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A daemon rooted in a temporary directory
pub struct TestDaemon {
    pub dir: TempDir,
    pub config: DaemonConfig,
    pub daemon: Daemon,
}

impl TestDaemon {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir).await
    }

    /// Bootstrap over an existing directory, picking up stored definitions
    pub async fn in_dir(dir: TempDir) -> Self {
        Self::with_stats_window(dir, Duration::from_millis(100)).await
    }

    pub async fn with_stats_window(dir: TempDir, window: Duration) -> Self {
        let config = DaemonConfig {
            data_dir: dir.path().join("servers"),
            definitions_dir: dir.path().join("definitions"),
            cache_dir: None,
            modules_dir: dir.path().join("modules"),
            shutdown_timeout: Duration::from_secs(5),
            stats_sample_window: window,
            ..Default::default()
        };
        let operations = Arc::new(build_operations(&config));
        let daemon = Daemon::bootstrap(&config, operations).await.unwrap();
        Self { dir, config, daemon }
    }

    /// Serve the router on an ephemeral port, returning `host:port`
    pub async fn serve(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let router = self.daemon.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        address
    }
}

pub fn definition(value: Value) -> paddock::workload::WorkloadDefinition {
    serde_json::from_value(value).unwrap()
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
