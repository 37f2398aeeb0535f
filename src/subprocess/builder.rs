use std::time::Duration;

use super::ProcessCommand;

/// Fluent construction of a [`ProcessCommand`]
#[derive(Debug, Clone)]
pub struct ProcessCommandBuilder {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessCommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// `None` lets the command run until it exits
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> ProcessCommand {
        ProcessCommand {
            program: self.program,
            args: self.args,
            timeout: self.timeout,
        }
    }
}
