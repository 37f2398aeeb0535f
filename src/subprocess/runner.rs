use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::error::ProcessError;

/// One short-lived helper invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Killed and reported as [`ProcessError::Timeout`] once this elapses
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    /// First argument, e.g. `ps` for `docker ps -a`
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands for real with `tokio::process`
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.display(),
                source: error,
            }
        }
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        match &result.status {
            ExitStatus::Success => {
                debug!("`{}` finished in {:?}", command.display(), result.duration);
            }
            ExitStatus::Error(code) => {
                debug!(
                    "`{}` exited with {} in {:?}",
                    command.display(),
                    code,
                    result.duration
                );
                if !result.stderr.is_empty() {
                    trace!("Stderr: {}", result.stderr.trim_end());
                }
            }
            ExitStatus::Signal(signal) => {
                warn!("`{}` killed by signal {}", command.display(), signal);
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        debug!("Running `{}`", command.display());
        let start = Instant::now();

        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::spawn_error(e, &command))?;

        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        let result = ProcessOutput {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };
        Self::log_result(&result, &command);
        Ok(result)
    }
}
