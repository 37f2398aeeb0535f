//! Native process backend

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, error, info, warn};

use super::execution::{drain_output, spawn_output_copy, Completion, ExecutionCore};
use super::registry::{EnvironmentFactory, EnvironmentSpec};
use super::{
    create_root_directory, Environment, ExecutionHandle, ExecutionRequest, ExecutionState,
    ServerStats, StopCommand,
};
use crate::console::ConsoleBuffer;
use crate::error::{Error, Result};

pub struct StandardEnvironment {
    core: Arc<ExecutionCore>,
    pid: Arc<Mutex<Option<u32>>>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    stats_window: Duration,
}

impl StandardEnvironment {
    pub fn new(root: PathBuf, console: Arc<ConsoleBuffer>) -> Self {
        Self {
            core: Arc::new(ExecutionCore::new(root, console)),
            pid: Arc::new(Mutex::new(None)),
            stdin: Arc::new(tokio::sync::Mutex::new(None)),
            stats_window: Duration::from_secs(1),
        }
    }

    pub fn with_stats_window(mut self, window: Duration) -> Self {
        self.stats_window = window;
        self
    }

    fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn probe(pid: u32) -> bool {
        // a zero signal checks the process exists and is ours to signal
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let root = self.core.root();
        let mut command = Command::new(&request.command);
        command
            .args(&request.args)
            .current_dir(root)
            .env("HOME", root)
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        command
    }
}

#[async_trait]
impl Environment for StandardEnvironment {
    fn kind(&self) -> &'static str {
        "standard"
    }

    fn root_directory(&self) -> &Path {
        self.core.root()
    }

    fn console(&self) -> &Arc<ConsoleBuffer> {
        self.core.console()
    }

    fn state(&self) -> ExecutionState {
        self.core.state()
    }

    async fn create(&self) -> Result<()> {
        create_root_directory(self.core.root()).await
    }

    async fn execute_async(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        let (state, observed) = self.core.observe();
        // a stopping execution is drained through the latch below
        let alive = state != ExecutionState::Stopping && self.is_running().await?;
        let generation = self.core.claim_start(observed, alive)?;

        let permit = match self.core.acquire_latch().await {
            Ok(permit) => permit,
            Err(e) => {
                self.core.abort_start(generation);
                return Err(e);
            }
        };

        debug!(
            root = %self.core.root().display(),
            "Starting process: {}",
            request.display()
        );

        let mut child = match self.build_command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                self.core.abort_start(generation);
                self.display_to_console(&format!("Failed to start process: {}\n", e));
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Process(crate::subprocess::ProcessError::CommandNotFound(
                        request.command.clone(),
                    ))
                } else {
                    Error::Io(e)
                });
            }
        };

        let pid = child.id();
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = pid;
        *self.stdin.lock().await = child.stdin.take();

        let mut copies = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            copies.push(spawn_output_copy(stdout, Arc::clone(self.core.console())));
        }
        if let Some(stderr) = child.stderr.take() {
            copies.push(spawn_output_copy(stderr, Arc::clone(self.core.console())));
        }

        info!(pid = ?pid, "Process started: {}", request.display());

        let (sender, handle) = ExecutionHandle::channel();
        self.core.mark_running(generation, handle.clone());

        let pid_slot = Arc::clone(&self.pid);
        let stdin_slot = Arc::clone(&self.stdin);
        self.core
            .spawn_watcher(generation, permit, sender, async move {
                let status = child.wait().await;
                drain_output(copies).await;
                stdin_slot.lock().await.take();
                pid_slot.lock().unwrap_or_else(|e| e.into_inner()).take();
                match status {
                    Ok(status) => {
                        debug!(pid = ?pid, "Process exited with {}", status);
                        Completion::from_status(&status)
                    }
                    Err(e) => {
                        error!(pid = ?pid, "Failed waiting on process: {}", e);
                        Completion::abandoned()
                    }
                }
            });

        Ok(handle)
    }

    async fn execute_in_main_process(&self, line: &str) -> Result<()> {
        let mut slot = self.stdin.lock().await;
        let stdin = slot.as_mut().ok_or(Error::NotRunning)?;
        stdin.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.pid().is_some_and(Self::probe))
    }

    async fn stop(&self, command: &StopCommand) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        self.core.mark_stopping();
        match command {
            StopCommand::Stdin(line) => self.execute_in_main_process(line).await,
            StopCommand::Signal(number) => self.send_signal(*number).await,
        }
    }

    async fn kill(&self) -> Result<()> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };
        if !Self::probe(pid) {
            return Ok(());
        }
        warn!(pid, "Killing process group");
        // the child leads its own group, so this takes its descendants too
        match signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Runtime(format!("failed to kill process {}: {}", pid, e))),
        }
    }

    async fn send_signal(&self, number: i32) -> Result<()> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };
        let sig = Signal::try_from(number)
            .map_err(|_| Error::Other(format!("invalid signal {}", number)))?;
        debug!(pid, "Sending {} to process", sig);
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Runtime(format!(
                "failed to signal process {}: {}",
                pid, e
            ))),
        }
    }

    async fn wait_for(&self, timeout: Duration) -> Result<()> {
        self.core.wait_current(timeout, || self.kill()).await
    }

    async fn get_stats(&self) -> Result<ServerStats> {
        let pid = self
            .pid()
            .filter(|pid| Self::probe(*pid))
            .ok_or(Error::NotRunning)?;
        let target = sysinfo::Pid::from_u32(pid);
        let refresh = ProcessRefreshKind::nothing().with_cpu().with_memory();

        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);
        tokio::time::sleep(self.stats_window).await;
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);

        let process = system.process(target).ok_or(Error::NotRunning)?;
        Ok(ServerStats {
            cpu: f64::from(process.cpu_usage()),
            memory: process.memory() as f64,
        })
    }

    fn current_execution(&self) -> Option<ExecutionHandle> {
        self.core.current()
    }
}

pub struct StandardFactory;

impl EnvironmentFactory for StandardFactory {
    fn key(&self) -> &'static str {
        "standard"
    }

    fn create(&self, spec: EnvironmentSpec) -> Result<Arc<dyn Environment>> {
        Ok(Arc::new(
            StandardEnvironment::new(spec.root, spec.console).with_stats_window(spec.stats_window),
        ))
    }
}
