//! Container backend driven through the `docker` CLI.
//!
//! Every one-shot runtime call (inspect, pull, create, kill, stats) goes
//! through a [`ProcessRunner`] so the backend can be exercised against
//! [`MockProcessRunner`](crate::subprocess::MockProcessRunner). Only the
//! long-lived `docker start --attach` process is spawned directly, since
//! its output has to be streamed into the console.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
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
use crate::subprocess::{ProcessCommandBuilder, ProcessOutput, ProcessRunner, TokioProcessRunner};

const DEFAULT_IMAGE: &str = "pufferpanel/generic";
const DEFAULT_BINARY: &str = "docker";
/// Bound on runtime queries; image pulls run unbounded
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin wrapper over the runtime CLI
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            binary: DEFAULT_BINARY.to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, args: &[&str]) -> Result<ProcessOutput> {
        let timeout = (args.first() != Some(&"pull")).then_some(QUERY_TIMEOUT);
        let command = ProcessCommandBuilder::new(self.binary.as_str())
            .args(args)
            .timeout(timeout)
            .build();
        Ok(self.runner.run(command).await?)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<ProcessOutput> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "`{} {}` failed: {}",
                self.binary,
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.run(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        self.run_checked(&["pull", image]).await.map(|_| ())
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        let filter = format!("name=^/{}$", name);
        let output = self
            .run_checked(&["ps", "-a", "--filter", &filter, "--format", "{{.ID}}"])
            .await?;
        Ok(!output.stdout.trim().is_empty())
    }

    pub async fn create_container(&self, spec: &ContainerSpec<'_>) -> Result<()> {
        let root = spec.root.display().to_string();
        let volume = format!("{}:{}", root, root);
        let home = format!("HOME={}", root);

        let mut args: Vec<String> = [
            "create",
            "--name",
            spec.name,
            "--interactive",
            "--rm",
            "--network",
            "host",
            "--workdir",
            root.as_str(),
            "--volume",
            volume.as_str(),
            "--env",
            home.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut env: Vec<_> = spec.request.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(user) = &spec.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        args.push(spec.image.to_string());
        args.push(spec.request.command.clone());
        args.extend(spec.request.args.iter().cloned());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args).await.map(|_| ())
    }

    pub async fn is_container_running(&self, name: &str) -> Result<bool> {
        let output = self
            .run(&["inspect", "--format", "{{.State.Running}}", name])
            .await?;
        if output.status.success() {
            return Ok(output.stdout.trim() == "true");
        }
        if output.stderr.contains("No such") {
            return Ok(false);
        }
        Err(Error::Runtime(output.stderr.trim().to_string()))
    }

    pub async fn kill(&self, name: &str, signal: Option<i32>) -> Result<()> {
        let signal = signal.map(|s| s.to_string());
        let mut args = vec!["kill"];
        if let Some(signal) = &signal {
            args.push("--signal");
            args.push(signal);
        }
        args.push(name);
        self.run_checked(&args).await.map(|_| ())
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.run_checked(&["stop", name]).await.map(|_| ())
    }

    pub async fn stats(&self, name: &str) -> Result<ServerStats> {
        let output = self
            .run_checked(&["stats", "--no-stream", "--format", "{{json .}}", name])
            .await?;
        parse_stats(&output.stdout)
    }
}

/// Arguments for `docker create`
pub struct ContainerSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub root: &'a Path,
    pub user: Option<String>,
    pub request: &'a ExecutionRequest,
}

#[derive(Deserialize)]
struct RawStats {
    #[serde(rename = "CPUPerc")]
    cpu: String,
    #[serde(rename = "MemUsage")]
    memory: String,
}

fn parse_stats(stdout: &str) -> Result<ServerStats> {
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or(Error::ServerOffline)?;
    let raw: RawStats = serde_json::from_str(line)?;

    let cpu = raw
        .cpu
        .trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|_| Error::Runtime(format!("unparseable CPU usage '{}'", raw.cpu)))?;
    let used = raw.memory.split('/').next().unwrap_or_default();
    let memory = parse_size(used)
        .ok_or_else(|| Error::Runtime(format!("unparseable memory usage '{}'", raw.memory)))?;

    Ok(ServerStats { cpu, memory })
}

/// Parse sizes like `12.5MiB` or `1.2GB` into bytes
fn parse_size(value: &str) -> Option<f64> {
    let value = value.trim();
    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * multiplier)
}

/// State shared with the background pull task
struct ImageState {
    cli: DockerCli,
    image: String,
    downloading: AtomicBool,
    console: Arc<ConsoleBuffer>,
}

impl ImageState {
    async fn ensure(&self, force: bool) -> Result<()> {
        if !force {
            match self.cli.image_exists(&self.image).await {
                Ok(true) => {
                    debug!(image = %self.image, "Image already present");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    self.console
                        .write(&format!("Failed to inspect image for container: {}\n", e));
                    return Err(e);
                }
            }
        }

        self.downloading.store(true, Ordering::SeqCst);
        self.console
            .write("Downloading image for container, please wait\n");
        info!(image = %self.image, "Pulling container image");

        let result = self.cli.pull_image(&self.image).await;
        self.downloading.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => self.console.write("Downloaded image for container\n"),
            Err(e) => {
                error!(image = %self.image, "Image pull failed: {}", e);
                self.console
                    .write(&format!("Failed to download image for container: {}\n", e));
            }
        }
        result
    }
}

pub struct DockerEnvironment {
    core: Arc<ExecutionCore>,
    container: String,
    image: Arc<ImageState>,
    user: Option<String>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
}

impl DockerEnvironment {
    pub fn new(
        container: impl Into<String>,
        image: impl Into<String>,
        root: PathBuf,
        console: Arc<ConsoleBuffer>,
        cli: DockerCli,
    ) -> Self {
        Self {
            core: Arc::new(ExecutionCore::new(root, Arc::clone(&console))),
            container: container.into(),
            image: Arc::new(ImageState {
                cli,
                image: image.into(),
                downloading: AtomicBool::new(false),
                console,
            }),
            user: Some(format!(
                "{}:{}",
                nix::unistd::getuid(),
                nix::unistd::getgid()
            )),
            stdin: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    fn cli(&self) -> &DockerCli {
        &self.image.cli
    }

    pub fn container_name(&self) -> &str {
        &self.container
    }

    pub fn is_downloading(&self) -> bool {
        self.image.downloading.load(Ordering::SeqCst)
    }

    /// Pull the image even when a copy is already present
    pub async fn refresh_image(&self) -> Result<()> {
        self.image.ensure(true).await
    }

    /// Make sure a container bound to this workload exists.
    ///
    /// Returns `true` when a new container was created, `false` when an
    /// existing one is reused.
    pub async fn ensure_container(&self, request: &ExecutionRequest) -> Result<bool> {
        if self.cli().container_exists(&self.container).await? {
            debug!(container = %self.container, "Reusing existing container");
            return Ok(false);
        }

        self.image.ensure(false).await?;
        self.cli()
            .create_container(&ContainerSpec {
                name: &self.container,
                image: &self.image.image,
                root: self.core.root(),
                user: self.user.clone(),
                request,
            })
            .await?;
        info!(container = %self.container, image = %self.image.image, "Created container");
        Ok(true)
    }

    fn attach_command(&self) -> Command {
        let mut command = Command::new(self.cli().binary());
        command
            .args(["start", "--attach", "--interactive", &self.container])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn kind(&self) -> &'static str {
        "docker"
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
        create_root_directory(self.core.root()).await?;

        // gate executions until the background pull settles
        self.image.downloading.store(true, Ordering::SeqCst);
        let image = Arc::clone(&self.image);
        tokio::spawn(async move {
            if let Err(e) = image.ensure(false).await {
                error!(image = %image.image, "Failed to prepare container image: {}", e);
            }
            image.downloading.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    async fn execute_async(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        if self.is_downloading() {
            return Err(Error::ImageDownloading(self.image.image.clone()));
        }

        let (state, observed) = self.core.observe();
        let alive = state != ExecutionState::Stopping && self.is_running().await?;
        let generation = self.core.claim_start(observed, alive)?;

        let permit = match self.core.acquire_latch().await {
            Ok(permit) => permit,
            Err(e) => {
                self.core.abort_start(generation);
                return Err(e);
            }
        };

        if let Err(e) = self.ensure_container(&request).await {
            self.core.abort_start(generation);
            return Err(e);
        }

        let mut child = match self.attach_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                self.core.abort_start(generation);
                return Err(Error::Runtime(format!(
                    "failed to attach to container {}: {}",
                    self.container, e
                )));
            }
        };

        *self.stdin.lock().await = child.stdin.take();
        let mut copies = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            copies.push(spawn_output_copy(stdout, Arc::clone(self.core.console())));
        }
        if let Some(stderr) = child.stderr.take() {
            copies.push(spawn_output_copy(stderr, Arc::clone(self.core.console())));
        }

        info!(container = %self.container, "Container started: {}", request.display());

        let (sender, handle) = ExecutionHandle::channel();
        self.core.mark_running(generation, handle.clone());

        let cli = self.cli().clone();
        let container = self.container.clone();
        let stdin_slot = Arc::clone(&self.stdin);
        self.core
            .spawn_watcher(generation, permit, sender, async move {
                let status = child.wait().await;
                drain_output(copies).await;
                stdin_slot.lock().await.take();

                // the attach stream closing does not always mean the container stopped
                if let Ok(true) = cli.is_container_running(&container).await {
                    if let Err(e) = cli.stop(&container).await {
                        warn!(container = %container, "Failed to stop detached container: {}", e);
                    }
                }

                match status {
                    Ok(status) => Completion::from_status(&status),
                    Err(e) => {
                        error!(container = %container, "Failed waiting on container: {}", e);
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
        self.cli().is_container_running(&self.container).await
    }

    async fn stop(&self, command: &StopCommand) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        self.core.mark_stopping();
        match command {
            StopCommand::Stdin(line) => self.execute_in_main_process(line).await,
            StopCommand::Signal(number) => self.cli().kill(&self.container, Some(*number)).await,
        }
    }

    async fn kill(&self) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        warn!(container = %self.container, "Killing container");
        self.cli().kill(&self.container, None).await
    }

    async fn send_signal(&self, number: i32) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        self.cli().kill(&self.container, Some(number)).await
    }

    async fn wait_for(&self, timeout: Duration) -> Result<()> {
        self.core.wait_current(timeout, || self.kill()).await
    }

    async fn get_stats(&self) -> Result<ServerStats> {
        if !self.is_running().await? {
            return Err(Error::ServerOffline);
        }
        self.cli().stats(&self.container).await
    }

    fn current_execution(&self) -> Option<ExecutionHandle> {
        self.core.current()
    }
}

pub struct DockerFactory {
    runner: Arc<dyn ProcessRunner>,
}

impl DockerFactory {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

impl Default for DockerFactory {
    fn default() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }
}

impl EnvironmentFactory for DockerFactory {
    fn key(&self) -> &'static str {
        "docker"
    }

    fn create(&self, spec: EnvironmentSpec) -> Result<Arc<dyn Environment>> {
        let image = spec
            .section
            .get("image")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_IMAGE)
            .to_string();
        let mut cli = DockerCli::new(Arc::clone(&self.runner));
        if let Some(binary) = spec.section.get("binary").and_then(|v| v.as_str()) {
            cli = cli.with_binary(binary);
        }
        Ok(Arc::new(DockerEnvironment::new(
            spec.id,
            image,
            spec.root,
            spec.console,
            cli,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;
    use tempfile::TempDir;

    fn environment(mock: &MockProcessRunner, root: PathBuf) -> DockerEnvironment {
        DockerEnvironment::new(
            "srv1",
            "alpine:3",
            root,
            Arc::new(ConsoleBuffer::default()),
            DockerCli::new(Arc::new(mock.clone())),
        )
    }

    #[tokio::test]
    async fn test_ensure_container_reuses_existing() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("ps")
            .returns_stdout("3f2a9c1d\n")
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        let request = ExecutionRequest::new("./run.sh");
        assert!(!env.ensure_container(&request).await.unwrap());
        assert!(!env.ensure_container(&request).await.unwrap());
        assert_eq!(mock.calls_with_subcommand("create"), 0);
        assert_eq!(mock.calls_with_subcommand("pull"), 0);
    }

    #[tokio::test]
    async fn test_ensure_container_creates_when_missing() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("ps")
            .returns_stdout("")
            .finish();
        mock.expect_command("docker")
            .with_subcommand("image")
            .returns_success()
            .finish();
        mock.expect_command("docker")
            .with_subcommand("create")
            .returns_stdout("abc123\n")
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        let request = ExecutionRequest::new("java")
            .args(["-jar", "server.jar"])
            .env([("EULA".to_string(), "true".to_string())].into());
        assert!(env.ensure_container(&request).await.unwrap());
        assert_eq!(mock.calls_with_subcommand("pull"), 0);

        let create = mock
            .get_call_history()
            .into_iter()
            .find(|cmd| cmd.args.first().map(String::as_str) == Some("create"))
            .unwrap();
        let line = create.args.join(" ");
        assert!(line.contains("--name srv1"));
        assert!(line.contains("--rm"));
        assert!(line.contains("--network host"));
        assert!(line.contains("--workdir /srv/srv1"));
        assert!(line.contains("--volume /srv/srv1:/srv/srv1"));
        assert!(line.contains("--env HOME=/srv/srv1"));
        assert!(line.contains("--env EULA=true"));
        assert!(line.ends_with("alpine:3 java -jar server.jar"));
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_with_console_notice() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("image")
            .returns_exit_code(1)
            .returns_stderr("Error: No such image: alpine:3")
            .finish();
        mock.expect_command("docker")
            .with_subcommand("pull")
            .times(1)
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        env.image.ensure(false).await.unwrap();
        assert!(!env.is_downloading());
        assert_eq!(mock.calls_with_subcommand("pull"), 1);

        let (text, _) = env.console().read_text_from(0);
        assert!(text.contains("Downloading image for container, please wait"));
        assert!(text.contains("Downloaded image for container"));
    }

    #[tokio::test]
    async fn test_create_reports_failed_image_inspect() {
        let dir = TempDir::new().unwrap();
        // no scripted responses, so `docker image inspect` errors
        let mock = MockProcessRunner::new();

        let env = environment(&mock, dir.path().join("srv1"));
        env.create().await.unwrap();
        for _ in 0..50 {
            if !env.is_downloading() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!env.is_downloading());
        assert_eq!(mock.calls_with_subcommand("image"), 1);
        assert_eq!(mock.calls_with_subcommand("pull"), 0);

        let (text, _) = env.console().read_text_from(0);
        assert!(text.contains("Failed to inspect image for container"));
    }

    #[tokio::test]
    async fn test_refresh_pulls_even_when_present() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("image")
            .returns_success()
            .finish();
        mock.expect_command("docker")
            .with_subcommand("pull")
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        env.refresh_image().await.unwrap();
        assert_eq!(mock.calls_with_subcommand("pull"), 1);
        assert_eq!(mock.calls_with_subcommand("image"), 0);
    }

    #[tokio::test]
    async fn test_start_fails_while_container_running() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("inspect")
            .returns_stdout("true\n")
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        let result = env.execute_async(ExecutionRequest::new("./run.sh")).await;
        assert!(matches!(result, Err(Error::AlreadyRunning)));
        assert_eq!(mock.calls_with_subcommand("create"), 0);
        assert_eq!(mock.calls_with_subcommand("start"), 0);
    }

    #[tokio::test]
    async fn test_missing_container_is_not_running() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("inspect")
            .returns_exit_code(1)
            .returns_stderr("Error: No such object: srv1")
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        assert!(!env.is_running().await.unwrap());
        env.kill().await.unwrap();
        env.send_signal(15).await.unwrap();
        env.stop(&StopCommand::Signal(15)).await.unwrap();
        assert!(matches!(env.get_stats().await, Err(Error::ServerOffline)));
        assert_eq!(mock.calls_with_subcommand("kill"), 0);
    }

    #[tokio::test]
    async fn test_stop_with_signal_uses_kill() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("inspect")
            .returns_stdout("true")
            .finish();
        mock.expect_command("docker")
            .with_subcommand("kill")
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        env.stop(&StopCommand::Signal(2)).await.unwrap();
        let kill = mock
            .get_call_history()
            .into_iter()
            .find(|cmd| cmd.args.first().map(String::as_str) == Some("kill"))
            .unwrap();
        assert_eq!(kill.args, vec!["kill", "--signal", "2", "srv1"]);
    }

    #[tokio::test]
    async fn test_start_gated_while_image_downloading() {
        let dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        let env = environment(&mock, dir.path().join("srv1"));
        env.image.downloading.store(true, Ordering::SeqCst);

        let result = env.execute_async(ExecutionRequest::new("./run.sh")).await;
        assert!(matches!(result, Err(Error::ImageDownloading(_))));
        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_stats_parsing() {
        let mock = MockProcessRunner::new();
        mock.expect_command("docker")
            .with_subcommand("inspect")
            .returns_stdout("true")
            .finish();
        mock.expect_command("docker")
            .with_subcommand("stats")
            .returns_stdout(
                r#"{"CPUPerc":"12.50%","MemUsage":"256MiB / 1.944GiB","Name":"srv1"}"#,
            )
            .finish();

        let env = environment(&mock, PathBuf::from("/srv/srv1"));
        let stats = env.get_stats().await.unwrap();
        assert_eq!(stats.cpu, 12.5);
        assert_eq!(stats.memory, 256.0 * 1024.0 * 1024.0);
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("512B"), Some(512.0));
        assert_eq!(parse_size("1.5kB"), Some(1500.0));
        assert_eq!(parse_size("2GiB"), Some(2.0 * 1024.0 * 1024.0 * 1024.0));
        assert_eq!(parse_size("lots"), None);
    }

    #[tokio::test]
    async fn test_create_rejects_existing_root() {
        let dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        let env = environment(&mock, dir.path().to_path_buf());
        assert!(matches!(env.create().await, Err(Error::AlreadyExists(_))));
    }
}
