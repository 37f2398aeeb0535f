use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::environment::{Environment, ExecutionRequest};
use crate::error::{Error, Result};
use crate::operations::{CreateOperation, Operation, OperationFactory};

/// Run each command line in the workload's environment, in order
pub struct Command {
    commands: Vec<String>,
    env: HashMap<String, String>,
}

#[async_trait]
impl Operation for Command {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        for line in &self.commands {
            debug!("Executing command: {}", line);
            env.display_to_console(&format!("Executing: {}\n", line));

            let mut parts = shell_words::split(line)
                .map_err(|e| Error::invalid_step("command", format!("{}: {}", line, e)))?
                .into_iter();
            let Some(program) = parts.next() else {
                continue;
            };

            let request = ExecutionRequest::new(program)
                .args(parts)
                .env(self.env.clone());
            let completion = env.execute(request).await?;
            if !completion.graceful {
                return Err(Error::Other(format!(
                    "`{}` exited unsuccessfully (code {})",
                    line,
                    completion
                        .exit_code
                        .map_or_else(|| "none".to_string(), |c| c.to_string())
                )));
            }
        }
        Ok(())
    }
}

pub struct CommandFactory;

impl OperationFactory for CommandFactory {
    fn key(&self) -> &str {
        "command"
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        Ok(Box::new(Command {
            commands: op.string_list("commands")?,
            env: op.env_vars,
        }))
    }
}
