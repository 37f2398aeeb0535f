use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::definition::WorkloadDefinition;
use crate::error::{Error, Result};

/// Persistence for workload definitions
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Ids of every stored definition, sorted
    async fn list(&self) -> Result<Vec<String>>;

    async fn load(&self, id: &str) -> Result<WorkloadDefinition>;

    async fn save(&self, id: &str, definition: &WorkloadDefinition) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// One pretty-printed `<id>.json` file per workload
pub struct FileDefinitionStore {
    dir: PathBuf,
}

impl FileDefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    ids.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load(&self, id: &str) -> Result<WorkloadDefinition> {
        let text = match tokio::fs::read_to_string(self.path(id)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    async fn save(&self, id: &str, definition: &WorkloadDefinition) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(definition)?;
        let path = self.path(id);
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &path).await?;
        debug!("Saved definition for {} to {}", id, path.display());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
