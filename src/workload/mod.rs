//! Managed workloads and the registry that owns them.
//!
//! A [`Workload`] pairs a [`WorkloadDefinition`] with the [`Environment`]
//! it runs in. Lifecycle requests from the HTTP and console adapters all
//! land here.

pub mod definition;
mod files;
pub mod registry;
pub mod store;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::environment::{Environment, ExecutionHandle, ExecutionRequest, ExecutionState};
use crate::error::{Error, Result};
use crate::operations::{OperationProcess, OperationRegistry, StepDescriptor};
use crate::tokens::{replace_tokens, replace_tokens_in_list, replace_tokens_in_map};

pub use definition::{RunConfig, Variable, WorkloadDefinition};
pub use files::{FileDesc, FileItem};
pub use registry::WorkloadRegistry;
pub use store::{DefinitionStore, FileDefinitionStore};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Workload {
    id: String,
    definition: RwLock<WorkloadDefinition>,
    environment: Arc<dyn Environment>,
    operations: Arc<OperationRegistry>,
    installing: AtomicBool,
    /// Set by explicit stop/kill so the exit is not treated as a crash
    stop_requested: AtomicBool,
    /// Bumped on every successful start; exit watchers of older starts
    /// never restart the workload
    starts: AtomicU64,
    stop_timeout: Duration,
}

/// Clears the install flag when the install ends, however it ends
struct InstallGuard(Arc<Workload>);

impl Drop for InstallGuard {
    fn drop(&mut self) {
        self.0.installing.store(false, Ordering::SeqCst);
    }
}

impl Workload {
    pub fn new(
        id: impl Into<String>,
        definition: WorkloadDefinition,
        environment: Arc<dyn Environment>,
        operations: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            id: id.into(),
            definition: RwLock::new(definition),
            environment,
            operations,
            installing: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            starts: AtomicU64::new(0),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Bound on how long install and delete wait for a running workload
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    pub fn definition(&self) -> WorkloadDefinition {
        self.definition
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn replace_definition(&self, definition: WorkloadDefinition) {
        *self.definition.write().unwrap_or_else(|e| e.into_inner()) = definition;
    }

    pub fn is_installing(&self) -> bool {
        self.installing.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> Result<bool> {
        self.environment.is_running().await
    }

    /// Variables and their metadata
    pub fn get_data(&self) -> BTreeMap<String, Variable> {
        self.definition
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .clone()
    }

    /// Update variable values in memory
    pub fn edit(&self, data: Map<String, Value>) {
        self.definition
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .apply_data(data);
    }

    fn pipeline(&self, steps: &[StepDescriptor], definition: &WorkloadDefinition) -> Result<OperationProcess> {
        OperationProcess::generate(
            steps,
            self.environment.as_ref(),
            &definition.data_context(),
            &definition.run.environment_vars,
            &self.operations,
        )
    }

    /// Start the workload; pre-run steps execute first.
    ///
    /// A workload still draining a stop is not rejected: the backend holds
    /// the start until the previous execution has exited.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_installing() {
            return Err(Error::InstallInProgress(self.id.clone()));
        }
        if matches!(
            self.environment.state(),
            ExecutionState::Starting | ExecutionState::Running
        ) {
            return Err(Error::AlreadyRunning);
        }

        let definition = self.definition();
        if !definition.run.pre.is_empty() {
            self.pipeline(&definition.run.pre, &definition)?
                .run(self.environment.as_ref())
                .await?;
        }

        let mut context = definition.data_context();
        context.insert(
            "rootDir".to_string(),
            Value::String(self.environment.root_directory().display().to_string()),
        );
        let request = ExecutionRequest {
            command: replace_tokens(&definition.run.command, &context),
            args: replace_tokens_in_list(&definition.run.arguments, &context),
            env: replace_tokens_in_map(&definition.run.environment_vars, &context),
        };

        info!(workload = %self.id, "Starting workload: {}", request.display());
        let handle = self.environment.execute_async(request).await?;
        // epoch before flag; watchers read them in the opposite order
        let epoch = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_requested.store(false, Ordering::SeqCst);
        self.watch_exit(handle, epoch);
        Ok(())
    }

    /// Run post steps and crash recovery once the execution ends
    fn watch_exit(self: &Arc<Self>, handle: ExecutionHandle, epoch: u64) {
        let workload = Arc::clone(self);
        tokio::spawn(async move {
            let completion = handle.wait().await;
            info!(
                workload = %workload.id,
                "Workload exited (graceful: {}, code: {:?})",
                completion.graceful,
                completion.exit_code
            );

            let definition = workload.definition();
            if !definition.run.post.is_empty() {
                let result = match workload.pipeline(&definition.run.post, &definition) {
                    Ok(mut process) => process.run(workload.environment.as_ref()).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    error!(workload = %workload.id, "Post-run steps failed: {}", e);
                }
            }

            let requested = workload.stop_requested.load(Ordering::SeqCst);
            let superseded = workload.starts.load(Ordering::SeqCst) != epoch;
            if !completion.graceful && !requested && !superseded && definition.autorestart_on_crash {
                warn!(workload = %workload.id, "Workload crashed, restarting");
                workload
                    .environment
                    .display_to_console("Server crashed, restarting\n");
                if let Err(e) = workload.start().await {
                    error!(workload = %workload.id, "Restart after crash failed: {}", e);
                }
            }
        });
    }

    /// Ask the workload to stop with its configured stop command
    pub async fn stop(&self) -> Result<()> {
        if !self.environment.is_running().await? {
            return Ok(());
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        let command = self
            .definition
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .run
            .stop_command();
        info!(workload = %self.id, "Stopping workload with {:?}", command);
        self.environment.stop(&command).await
    }

    pub async fn kill(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.environment.kill().await
    }

    /// Stop, then wait up to the stop timeout before killing
    pub async fn stop_and_wait(&self) -> Result<()> {
        self.stop().await?;
        self.environment.wait_for(self.stop_timeout).await
    }

    fn claim_install(self: &Arc<Self>) -> Result<InstallGuard> {
        if self
            .installing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InstallInProgress(self.id.clone()));
        }
        Ok(InstallGuard(Arc::clone(self)))
    }

    /// Run the install pipeline to completion
    pub async fn install(self: &Arc<Self>) -> Result<()> {
        let guard = self.claim_install()?;
        self.run_install(guard).await
    }

    /// Start the install pipeline in the background.
    ///
    /// A second install while one is running is rejected here, before
    /// anything is spawned.
    pub fn spawn_install(self: &Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        let guard = self.claim_install()?;
        let workload = Arc::clone(self);
        Ok(tokio::spawn(async move { workload.run_install(guard).await }))
    }

    async fn run_install(&self, _guard: InstallGuard) -> Result<()> {
        let env = self.environment.as_ref();
        if env.is_running().await? {
            info!(workload = %self.id, "Stopping workload before install");
            self.stop_and_wait().await?;
        }

        let root = env.root_directory();
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            tokio::fs::create_dir_all(root).await?;
        }

        env.display_to_console("Installing server\n");
        info!(workload = %self.id, "Installing workload");

        let definition = self.definition();
        let result = match self.pipeline(&definition.install, &definition) {
            Ok(mut process) => process.run(env).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => env.display_to_console("Server installed\n"),
            Err(e) => {
                error!(workload = %self.id, "Install failed: {}", e);
                env.display_to_console(&format!("Error running installation: {}\n", e));
            }
        }
        result
    }

    pub async fn get_item(&self, path: &str) -> Result<FileItem> {
        files::get_item(self.environment.root_directory(), path).await
    }

    pub async fn delete_item(&self, path: &str) -> Result<()> {
        files::delete_item(self.environment.root_directory(), path).await
    }

    pub async fn create_folder(&self, path: &str) -> Result<()> {
        files::create_folder(self.environment.root_directory(), path).await
    }
}
