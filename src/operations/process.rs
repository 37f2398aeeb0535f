use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info};

use super::{CreateOperation, Operation, OperationRegistry, StepDescriptor};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::tokens::{replace_tokens_in_map, replace_tokens_in_value, DataContext};

struct Step {
    index: usize,
    kind: String,
    operation: Box<dyn Operation>,
}

/// A resolved, single-use provisioning pipeline.
///
/// Steps are consumed front to back; a finished pipeline is empty.
pub struct OperationProcess {
    steps: VecDeque<Step>,
}

impl std::fmt::Debug for OperationProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationProcess")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.kind.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl OperationProcess {
    /// Resolve `directions` for `env`.
    ///
    /// The data context gains `rootDir` (and its legacy alias `rootdir`).
    /// An unknown step type fails the whole pipeline before anything runs.
    pub fn generate(
        directions: &[StepDescriptor],
        env: &dyn Environment,
        data: &DataContext,
        env_vars: &HashMap<String, String>,
        registry: &OperationRegistry,
    ) -> Result<Self> {
        let mut context = data.clone();
        let root = Value::String(env.root_directory().display().to_string());
        context.insert("rootdir".to_string(), root.clone());
        context.insert("rootDir".to_string(), root);

        let steps = resolve_steps(directions, &context, env_vars, registry)?;
        Ok(Self {
            steps: steps
                .into_iter()
                .enumerate()
                .map(|(index, (kind, operation))| Step {
                    index,
                    kind,
                    operation,
                })
                .collect(),
        })
    }

    /// Run every remaining step, stopping at the first failure.
    ///
    /// Steps that already ran are not rolled back.
    pub async fn run(&mut self, env: &dyn Environment) -> Result<()> {
        while self.has_next() {
            if let Err(e) = self.run_next(env).await {
                error!("Error running process: {}", e);
                self.steps.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn run_next(&mut self, env: &dyn Environment) -> Result<()> {
        let Some(step) = self.steps.pop_front() else {
            return Ok(());
        };
        debug!(step = step.index, kind = %step.kind, "Running operation");
        step.operation
            .run(env)
            .await
            .map_err(|source| Error::StepFailed {
                index: step.index,
                kind: step.kind.clone(),
                source: Box::new(source),
            })
    }

    pub fn has_next(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

/// Turn descriptors into operations against an already-built context
pub(crate) fn resolve_steps(
    directions: &[StepDescriptor],
    context: &DataContext,
    env_vars: &HashMap<String, String>,
    registry: &OperationRegistry,
) -> Result<Vec<(String, Box<dyn Operation>)>> {
    let env_vars = replace_tokens_in_map(env_vars, context);
    let mut operations = Vec::with_capacity(directions.len());

    for (index, direction) in directions.iter().enumerate() {
        let kind = direction
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_step("", format!("step {} has no type", index)))?;
        let factory = registry
            .get(kind)
            .ok_or_else(|| Error::UnknownStepKind(kind.to_string()))?;

        let args = direction
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .map(|(key, value)| (key.clone(), replace_tokens_in_value(value, context)))
            .collect();

        let operation = factory
            .create(CreateOperation {
                kind: kind.to_string(),
                args,
                env_vars: env_vars.clone(),
                data: context.clone(),
            })
            .map_err(|source| Error::StepFailed {
                index,
                kind: kind.to_string(),
                source: Box::new(source),
            })?;
        operations.push((kind.to_string(), operation));
    }

    info!("Resolved {} operation(s)", operations.len());
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleBuffer;
    use crate::environment::StandardEnvironment;
    use crate::operations::Downloader;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn steps(value: serde_json::Value) -> Vec<StepDescriptor> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn setup() -> (TempDir, StandardEnvironment, OperationRegistry) {
        let dir = TempDir::new().unwrap();
        let env = StandardEnvironment::new(
            dir.path().to_path_buf(),
            Arc::new(ConsoleBuffer::default()),
        );
        let registry = OperationRegistry::builtin(Arc::new(Downloader::new(None)));
        (dir, env, registry)
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline_and_keeps_earlier_effects() {
        let (dir, env, registry) = setup();
        let directions = steps(json!([
            {"type": "writefile", "target": "first.txt", "text": "one"},
            {"type": "move", "source": "missing.txt", "target": "moved.txt"},
            {"type": "writefile", "target": "third.txt", "text": "three"}
        ]));

        let mut process =
            OperationProcess::generate(&directions, &env, &DataContext::new(), &HashMap::new(), &registry)
                .unwrap();
        assert_eq!(process.remaining(), 3);

        let err = process.run(&env).await.unwrap_err();
        match err {
            Error::StepFailed { index, kind, .. } => {
                assert_eq!(index, 1);
                assert_eq!(kind, "move");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(dir.path().join("first.txt").exists());
        assert!(!dir.path().join("third.txt").exists());
        assert!(!process.has_next());
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let (_dir, env, registry) = setup();
        let mut process =
            OperationProcess::generate(&[], &env, &DataContext::new(), &HashMap::new(), &registry)
                .unwrap();
        assert!(!process.has_next());
        process.run(&env).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_before_running() {
        let (dir, env, registry) = setup();
        let directions = steps(json!([
            {"type": "writefile", "target": "first.txt", "text": "one"},
            {"type": "teleport"}
        ]));
        let result =
            OperationProcess::generate(&directions, &env, &DataContext::new(), &HashMap::new(), &registry);
        assert!(matches!(result, Err(Error::UnknownStepKind(kind)) if kind == "teleport"));
        assert!(!dir.path().join("first.txt").exists());
    }

    #[tokio::test]
    async fn test_tokens_expanded_in_parameters() {
        let (dir, env, registry) = setup();
        let directions = steps(json!([
            {"type": "writefile", "target": "${rootDir}/server.properties", "text": "motd=${motd} ${unset}"},
            {"type": "mkdir", "target": "${rootdir}/world"}
        ]));
        let data = json!({"motd": {"value": "Hello", "desc": "message"}})
            .as_object()
            .cloned()
            .unwrap();

        let mut process =
            OperationProcess::generate(&directions, &env, &data, &HashMap::new(), &registry).unwrap();
        process.run(&env).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("server.properties")).unwrap();
        assert_eq!(written, "motd=Hello ${unset}");
        assert!(dir.path().join("world").is_dir());
    }

    #[tokio::test]
    async fn test_command_step_uses_expanded_env() {
        let (_dir, env, registry) = setup();
        let directions = steps(json!([
            {"type": "command", "commands": ["sh -c 'echo flavor=$FLAVOR'"]}
        ]));
        let data = json!({"flavor": "vanilla"}).as_object().cloned().unwrap();
        let env_vars = HashMap::from([("FLAVOR".to_string(), "${flavor}".to_string())]);

        let mut process =
            OperationProcess::generate(&directions, &env, &data, &env_vars, &registry).unwrap();
        process.run(&env).await.unwrap();

        let (text, _) = env.console().read_text_from(0);
        assert!(text.contains("Executing: sh -c 'echo flavor=$FLAVOR'"));
        assert!(text.contains("flavor=vanilla"));
    }

    #[tokio::test]
    async fn test_invalid_parameters_report_position() {
        let (_dir, env, registry) = setup();
        let directions = steps(json!([
            {"type": "mkdir", "target": "a"},
            {"type": "writefile", "text": "no target"}
        ]));
        let result =
            OperationProcess::generate(&directions, &env, &DataContext::new(), &HashMap::new(), &registry);
        assert!(matches!(result, Err(Error::StepFailed { index: 1, .. })));
    }
}
