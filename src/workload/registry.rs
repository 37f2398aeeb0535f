use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::store::DefinitionStore;
use super::{Workload, WorkloadDefinition};
use crate::environment::EnvironmentRegistry;
use crate::error::{Error, Result};
use crate::operations::OperationRegistry;

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid id pattern"));

/// Owner of every workload known to the daemon
pub struct WorkloadRegistry {
    workloads: RwLock<HashMap<String, Arc<Workload>>>,
    store: Arc<dyn DefinitionStore>,
    environments: Arc<EnvironmentRegistry>,
    operations: Arc<OperationRegistry>,
    servers_folder: PathBuf,
    stop_timeout: Duration,
}

impl WorkloadRegistry {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        environments: Arc<EnvironmentRegistry>,
        operations: Arc<OperationRegistry>,
        servers_folder: impl Into<PathBuf>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            workloads: RwLock::new(HashMap::new()),
            store,
            environments,
            operations,
            servers_folder: servers_folder.into(),
            stop_timeout,
        }
    }

    fn build(&self, id: &str, definition: WorkloadDefinition) -> Result<Arc<Workload>> {
        let environment = self.environments.create(
            definition.environment_kind(),
            &self.servers_folder,
            id,
            &definition.environment,
        )?;
        Ok(Arc::new(
            Workload::new(id, definition, environment, Arc::clone(&self.operations))
                .with_stop_timeout(self.stop_timeout),
        ))
    }

    /// Load every stored definition. Definitions that fail to load are
    /// logged and skipped. Returns the number loaded.
    pub async fn load_all(&self) -> Result<usize> {
        let ids = self.store.list().await?;
        let mut loaded = 0;
        for id in ids {
            let workload = match self.store.load(&id).await.and_then(|d| self.build(&id, d)) {
                Ok(workload) => workload,
                Err(e) => {
                    error!(workload = %id, "Failed to load workload: {}", e);
                    continue;
                }
            };
            self.workloads.write().await.insert(id.clone(), workload);
            debug!(workload = %id, "Loaded workload");
            loaded += 1;
        }
        info!("Loaded {} workloads", loaded);
        Ok(loaded)
    }

    /// Provision a new workload: allocate its backend, persist the
    /// definition and register it. Install is a separate request.
    pub async fn create(&self, id: &str, definition: WorkloadDefinition) -> Result<Arc<Workload>> {
        if !ID_PATTERN.is_match(id) {
            return Err(Error::InvalidId(id.to_string()));
        }
        if self.workloads.read().await.contains_key(id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }

        let workload = self.build(id, definition)?;
        match workload.environment().create().await {
            Ok(()) => {}
            Err(Error::AlreadyExists(path)) => {
                warn!(workload = %id, "Reusing existing root {}", path);
            }
            Err(e) => return Err(e),
        }
        self.store.save(id, &workload.definition()).await?;

        let mut workloads = self.workloads.write().await;
        if workloads.contains_key(id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }
        workloads.insert(id.to_string(), Arc::clone(&workload));
        info!(workload = %id, "Created workload");
        Ok(workload)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Workload>> {
        self.workloads
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// All workloads, ordered by id
    pub async fn list(&self) -> Vec<Arc<Workload>> {
        let mut workloads: Vec<_> = self.workloads.read().await.values().cloned().collect();
        workloads.sort_by(|a, b| a.id().cmp(b.id()));
        workloads
    }

    /// Update variable values and persist the definition
    pub async fn edit(&self, id: &str, data: Map<String, Value>) -> Result<()> {
        let workload = self.get(id).await?;
        workload.edit(data);
        self.store.save(id, &workload.definition()).await
    }

    /// Kill the workload, remove its root directory and definition, then
    /// forget it.
    ///
    /// Rejected while an install is running. The workload stays registered
    /// until teardown has succeeded, so a failed delete can be retried.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let workload = self.get(id).await?;
        // holds off installs and starts for the rest of the teardown
        let _guard = workload.claim_install()?;

        workload.kill().await?;
        workload.environment().wait_for(self.stop_timeout).await?;

        let root = workload.environment().root_directory();
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.store.delete(id).await?;

        let mut workloads = self.workloads.write().await;
        if workloads
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &workload))
        {
            workloads.remove(id);
        }
        info!(workload = %id, "Deleted workload");
        Ok(())
    }

    /// Re-read the stored definition without touching the running process
    pub async fn reload(&self, id: &str) -> Result<()> {
        let workload = self.get(id).await?;
        let definition = self.store.load(id).await?;
        workload.replace_definition(definition);
        info!(workload = %id, "Reloaded workload definition");
        Ok(())
    }

    /// Start every enabled workload flagged for autostart
    pub async fn start_autostart(&self) {
        for workload in self.list().await {
            let definition = workload.definition();
            if !definition.enabled || !definition.autostart {
                continue;
            }
            workload
                .environment()
                .display_to_console("Server has been queued to start\n");
            if let Err(e) = workload.start().await {
                error!(workload = %workload.id(), "Autostart failed: {}", e);
            }
        }
    }

    /// Stop every running workload, waiting up to `timeout` for each
    /// before killing it
    pub async fn shutdown_all(&self, timeout: Duration) {
        let workloads = self.list().await;
        for workload in &workloads {
            if let Err(e) = workload.stop().await {
                warn!(workload = %workload.id(), "Stop during shutdown failed: {}", e);
            }
        }

        let waits = workloads.iter().map(|workload| async move {
            if let Err(e) = workload.environment().wait_for(timeout).await {
                error!(workload = %workload.id(), "Wait during shutdown failed: {}", e);
            }
        });
        futures::future::join_all(waits).await;
        info!("All workloads stopped");
    }
}
