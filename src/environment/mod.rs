//! Execution backends.
//!
//! An [`Environment`] owns the lifecycle of one workload instance, either as
//! a native process ([`standard`]) or inside a container ([`docker`]). Both
//! variants share the bookkeeping in [`execution`] and pipe every byte of
//! workload output into the workload's [`ConsoleBuffer`].

pub mod docker;
pub mod execution;
pub mod registry;
pub mod standard;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::console::ConsoleBuffer;
use crate::error::Result;

pub use docker::{DockerEnvironment, DockerFactory};
pub use execution::{Completion, ExecutionCore, ExecutionHandle, ExecutionState};
pub use registry::{EnvironmentFactory, EnvironmentRegistry, EnvironmentSpec};
pub use standard::{StandardEnvironment, StandardFactory};

/// A program to launch inside a backend
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// How a running workload is asked to shut down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCommand {
    /// Line written to the workload's stdin
    Stdin(String),
    /// Signal number delivered to the process or container
    Signal(i32),
}

/// Resource snapshot of a running workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Percent of one core
    pub cpu: f64,
    /// Resident memory in bytes
    pub memory: f64,
}

#[async_trait]
pub trait Environment: Send + Sync {
    /// Registry key of this backend kind
    fn kind(&self) -> &'static str;

    fn root_directory(&self) -> &Path;

    fn console(&self) -> &Arc<ConsoleBuffer>;

    fn state(&self) -> ExecutionState;

    /// Write a daemon-originated message into the console
    fn display_to_console(&self, text: &str) {
        self.console().write(text);
    }

    /// Allocate the sandbox; fails with `AlreadyExists` when it is present
    async fn create(&self) -> Result<()>;

    /// Start the workload and return its completion handle.
    ///
    /// Fails with `AlreadyRunning` while an execution is live and blocks
    /// while a previous execution is still draining.
    async fn execute_async(&self, request: ExecutionRequest) -> Result<ExecutionHandle>;

    /// Start and wait for exit
    async fn execute(&self, request: ExecutionRequest) -> Result<Completion> {
        let handle = self.execute_async(request).await?;
        Ok(handle.wait().await)
    }

    /// Write a line to the running workload's stdin
    async fn execute_in_main_process(&self, line: &str) -> Result<()>;

    async fn is_running(&self) -> Result<bool>;

    /// Ask the workload to stop; no-op when it is not running
    async fn stop(&self, command: &StopCommand) -> Result<()>;

    /// Forceful termination; no-op when not running
    async fn kill(&self) -> Result<()>;

    /// Best-effort signal delivery; no-op when not running
    async fn send_signal(&self, signal: i32) -> Result<()>;

    /// Wait for the current execution, killing it once `timeout` elapses.
    /// `Duration::ZERO` waits indefinitely.
    async fn wait_for(&self, timeout: Duration) -> Result<()>;

    /// Sample CPU and memory usage; blocks for the sampling window
    async fn get_stats(&self) -> Result<ServerStats>;

    /// Completion handle of the most recent execution
    fn current_execution(&self) -> Option<ExecutionHandle>;
}

/// Create the sandbox directory, mapping "already there" to `AlreadyExists`
pub(crate) async fn create_root_directory(root: &Path) -> Result<()> {
    if let Some(parent) = root.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::create_dir(root).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
            crate::error::Error::AlreadyExists(root.display().to_string()),
        ),
        Err(e) => Err(e.into()),
    }
}
