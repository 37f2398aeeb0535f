//! Extension step kinds loaded from TOML at startup.
//!
//! Each `<modules_dir>/operations/*.toml` file declares a new step `key`
//! and a list of templated steps built from kinds registered before it:
//!
//! ```toml
//! key = "paperdl"
//!
//! [[steps]]
//! type = "download"
//! files = ["https://example.invalid/paper/${version}/paper.jar"]
//!
//! [[steps]]
//! type = "move"
//! source = "paper.jar"
//! target = "${target}"
//! ```
//!
//! The extension step's own parameters are added to the data context the
//! templates are expanded against.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use super::process::resolve_steps;
use super::{
    CreateOperation, Operation, OperationFactory, OperationRegistry, OperationRegistryBuilder,
    StepDescriptor,
};
use crate::environment::Environment;
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct ExtensionDefinition {
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepDescriptor>,
}

pub struct CompositeFactory {
    key: String,
    templates: Vec<StepDescriptor>,
    base: OperationRegistry,
}

impl CompositeFactory {
    pub fn new(definition: ExtensionDefinition, base: OperationRegistry) -> Self {
        Self {
            key: definition.key,
            templates: definition.steps,
            base,
        }
    }
}

impl OperationFactory for CompositeFactory {
    fn key(&self) -> &str {
        &self.key
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        let mut context = op.data;
        context.extend(op.args);
        let steps = resolve_steps(&self.templates, &context, &op.env_vars, &self.base)?;
        Ok(Box::new(Composite {
            steps: steps.into_iter().map(|(_, operation)| operation).collect(),
        }))
    }
}

struct Composite {
    steps: Vec<Box<dyn Operation>>,
}

#[async_trait]
impl Operation for Composite {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        for step in &self.steps {
            step.run(env).await?;
        }
        Ok(())
    }
}

/// Register every extension found under `<modules_dir>/operations`.
///
/// Malformed files and keys that are already taken are logged and skipped.
/// Returns the number of extensions registered.
pub fn load_extensions(builder: &mut OperationRegistryBuilder, modules_dir: &Path) -> usize {
    let dir = modules_dir.join("operations");
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Cannot read extension directory {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();

    let mut loaded = 0;
    for path in files {
        let definition = match std::fs::read_to_string(&path)
            .map_err(crate::error::Error::from)
            .and_then(|text| Ok(toml::from_str::<ExtensionDefinition>(&text)?))
        {
            Ok(definition) => definition,
            Err(e) => {
                warn!("Skipping extension {}: {}", path.display(), e);
                continue;
            }
        };

        let key = definition.key.clone();
        // earlier extensions are composable from later files
        let base = builder.snapshot();
        match builder.register(std::sync::Arc::new(CompositeFactory::new(definition, base))) {
            Ok(()) => {
                info!("Loaded operation extension '{}' from {}", key, path.display());
                loaded += 1;
            }
            Err(e) => warn!("Skipping extension {}: {}", path.display(), e),
        }
    }
    loaded
}
