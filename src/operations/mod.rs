//! Provisioning pipeline engine and step catalog.
//!
//! A pipeline is a list of step descriptors (`{"type": ..., ...}`) resolved
//! against an [`OperationRegistry`] and run in order against one
//! [`Environment`]. The registry is assembled once at startup (built-in
//! steps, then extension steps) and is read-only afterwards.

pub mod download;
pub mod extensions;
pub mod process;
pub mod steps;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::tokens::DataContext;

pub use download::Downloader;
pub use process::OperationProcess;

/// One step descriptor as it appears in a workload definition
pub type StepDescriptor = Map<String, Value>;

#[async_trait]
pub trait Operation: Send + Sync {
    async fn run(&self, env: &dyn Environment) -> Result<()>;
}

pub trait OperationFactory: Send + Sync {
    fn key(&self) -> &str;

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>>;
}

/// Input handed to a factory, with tokens already expanded
#[derive(Debug, Clone, Default)]
pub struct CreateOperation {
    pub kind: String,
    pub args: Map<String, Value>,
    pub env_vars: HashMap<String, String>,
    pub data: DataContext,
}

impl CreateOperation {
    pub fn string(&self, key: &str) -> Result<String> {
        self.optional_string(key).ok_or_else(|| {
            Error::invalid_step(&self.kind, format!("missing string parameter '{}'", key))
        })
    }

    pub fn optional_string(&self, key: &str) -> Option<String> {
        self.args.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// A list of strings; a lone string is accepted as a one-item list
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.args.get(key) {
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::invalid_step(&self.kind, format!("'{}' must hold strings", key))
                    })
                })
                .collect(),
            _ => Err(Error::invalid_step(
                &self.kind,
                format!("missing list parameter '{}'", key),
            )),
        }
    }
}

/// Step kind name to factory
#[derive(Clone, Default)]
pub struct OperationRegistry {
    factories: HashMap<String, Arc<dyn OperationFactory>>,
}

impl OperationRegistry {
    pub fn builder() -> OperationRegistryBuilder {
        OperationRegistryBuilder::default()
    }

    /// Registry holding only the built-in step kinds
    pub fn builtin(downloader: Arc<Downloader>) -> Self {
        Self::builder().with_builtin(downloader).build()
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn OperationFactory>> {
        self.factories.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Mutable phase of a registry; frozen by [`build`](Self::build)
#[derive(Default)]
pub struct OperationRegistryBuilder {
    factories: HashMap<String, Arc<dyn OperationFactory>>,
}

impl OperationRegistryBuilder {
    pub fn register(&mut self, factory: Arc<dyn OperationFactory>) -> Result<()> {
        let key = factory.key().to_string();
        if self.factories.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("operation '{}'", key)));
        }
        debug!("Registered operation '{}'", key);
        self.factories.insert(key, factory);
        Ok(())
    }

    pub fn with_builtin(mut self, downloader: Arc<Downloader>) -> Self {
        for factory in steps::builtin(downloader) {
            // built-in keys are distinct
            let _ = self.register(factory);
        }
        self
    }

    /// Snapshot of what is registered so far
    pub fn snapshot(&self) -> OperationRegistry {
        OperationRegistry {
            factories: self.factories.clone(),
        }
    }

    pub fn build(self) -> OperationRegistry {
        OperationRegistry {
            factories: self.factories,
        }
    }
}

static REGISTRY: OnceCell<Arc<OperationRegistry>> = OnceCell::new();

/// Publish the process-wide registry; only the first call wins
pub fn install_registry(registry: OperationRegistry) -> Result<Arc<OperationRegistry>> {
    let registry = Arc::new(registry);
    REGISTRY
        .set(Arc::clone(&registry))
        .map_err(|_| Error::AlreadyExists("operation registry".to_string()))?;
    Ok(registry)
}

/// The process-wide registry, once installed
pub fn registry() -> Option<Arc<OperationRegistry>> {
    REGISTRY.get().cloned()
}
