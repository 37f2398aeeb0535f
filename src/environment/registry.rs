use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::docker::DockerFactory;
use super::standard::StandardFactory;
use super::Environment;
use crate::console::{ConsoleBuffer, ConsoleConfig};
use crate::error::{Error, Result};
use crate::tokens::{replace_tokens, DataContext};

/// Everything a factory needs to build one backend instance
pub struct EnvironmentSpec {
    pub id: String,
    pub root: PathBuf,
    pub console: Arc<ConsoleBuffer>,
    /// Kind-specific keys from the workload's `environment` section
    pub section: Map<String, Value>,
    pub stats_window: Duration,
}

pub trait EnvironmentFactory: Send + Sync {
    fn key(&self) -> &'static str;

    fn create(&self, spec: EnvironmentSpec) -> Result<Arc<dyn Environment>>;
}

/// Backend kind name to factory
pub struct EnvironmentRegistry {
    factories: HashMap<String, Arc<dyn EnvironmentFactory>>,
    console: ConsoleConfig,
    stats_window: Duration,
}

impl EnvironmentRegistry {
    pub fn new(console: ConsoleConfig, stats_window: Duration) -> Self {
        Self {
            factories: HashMap::new(),
            console,
            stats_window,
        }
    }

    /// Registry with the `standard` and `docker` backends
    pub fn with_builtin(console: ConsoleConfig, stats_window: Duration) -> Self {
        let mut registry = Self::new(console, stats_window);
        registry.register(Arc::new(StandardFactory));
        registry.register(Arc::new(DockerFactory::default()));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn EnvironmentFactory>) {
        debug!("Registered environment kind '{}'", factory.key());
        self.factories.insert(factory.key().to_string(), factory);
    }

    /// Build a backend for workload `id`.
    ///
    /// The root directory is `section.root` when set (with `${id}` and
    /// `${rootDir}` expanded), otherwise `<servers_folder>/<id>`.
    pub fn create(
        &self,
        kind: &str,
        servers_folder: &Path,
        id: &str,
        section: &Map<String, Value>,
    ) -> Result<Arc<dyn Environment>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| Error::UndefinedEnvironment(kind.to_string()))?;

        let default_root = servers_folder.join(id);
        let root = match section.get("root").and_then(Value::as_str) {
            Some(root) if !root.is_empty() => {
                let mut context = DataContext::new();
                context.insert("id".to_string(), Value::String(id.to_string()));
                context.insert(
                    "rootDir".to_string(),
                    Value::String(default_root.display().to_string()),
                );
                PathBuf::from(replace_tokens(root, &context))
            }
            _ => default_root,
        };

        factory.create(EnvironmentSpec {
            id: id.to_string(),
            root,
            console: Arc::new(ConsoleBuffer::new(self.console.clone())),
            section: section.clone(),
            stats_window: self.stats_window,
        })
    }

    /// Registered kind names, sorted
    pub fn supported(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
