use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

/// Scripted [`ProcessRunner`] for exercising runtime-CLI code paths.
///
/// Responses are matched by program and, optionally, subcommand, in the
/// order they were registered. Every call is recorded, matched or not.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    responses: Vec<ScriptedResponse>,
    history: Vec<ProcessCommand>,
}

struct ScriptedResponse {
    program: String,
    subcommand: Option<String>,
    output: ProcessOutput,
    calls: usize,
    limit: Option<usize>,
}

impl ScriptedResponse {
    fn matches(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self
                .subcommand
                .as_deref()
                .map_or(true, |sub| command.subcommand() == Some(sub))
    }
}

/// Builder returned by [`MockProcessRunner::expect_command`]
pub struct MockCommandConfig {
    runner: MockProcessRunner,
    response: ScriptedResponse,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            response: ScriptedResponse {
                program: program.to_string(),
                subcommand: None,
                output: ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::ZERO,
                },
                calls: 0,
                limit: None,
            },
        }
    }

    /// Recorded calls whose first argument is `subcommand`
    pub fn calls_with_subcommand(&self, subcommand: &str) -> usize {
        self.state()
            .history
            .iter()
            .filter(|command| command.subcommand() == Some(subcommand))
            .count()
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.state().history.clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let mut state = self.state();
        state.history.push(command.clone());

        let Some(response) = state.responses.iter_mut().find(|r| r.matches(&command)) else {
            return Err(ProcessError::MockExpectationNotMet(format!(
                "no response scripted for `{}`",
                command.display()
            )));
        };

        response.calls += 1;
        if let Some(limit) = response.limit {
            if response.calls > limit {
                return Err(ProcessError::MockExpectationNotMet(format!(
                    "`{}` called {} times, expected {}",
                    command.display(),
                    response.calls,
                    limit
                )));
            }
        }
        Ok(response.output.clone())
    }
}

impl MockCommandConfig {
    /// Only answer calls whose first argument is `subcommand`
    pub fn with_subcommand(mut self, subcommand: &str) -> Self {
        self.response.subcommand = Some(subcommand.to_string());
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.response.output.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.response.output.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.response.output.status = match code {
            0 => ExitStatus::Success,
            code => ExitStatus::Error(code),
        };
        self
    }

    pub fn returns_success(self) -> Self {
        self.returns_exit_code(0)
    }

    /// Fail any call beyond the `n`th
    pub fn times(mut self, n: usize) -> Self {
        self.response.limit = Some(n);
        self
    }

    pub fn finish(self) {
        self.runner.state().responses.push(self.response);
    }
}
