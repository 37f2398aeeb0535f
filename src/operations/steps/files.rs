//! Filesystem steps, confined to the workload root

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::environment::Environment;
use crate::error::Result;
use crate::operations::{CreateOperation, Operation, OperationFactory};
use crate::paths::resolve_in_root;

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

pub struct Mkdir {
    target: String,
}

#[async_trait]
impl Operation for Mkdir {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        let target = resolve_in_root(env.root_directory(), &self.target)?;
        debug!("Creating directory {}", target.display());
        env.display_to_console(&format!("Creating directory: {}\n", self.target));
        tokio::fs::create_dir_all(&target).await?;
        Ok(())
    }
}

pub struct MkdirFactory;

impl OperationFactory for MkdirFactory {
    fn key(&self) -> &str {
        "mkdir"
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        Ok(Box::new(Mkdir {
            target: op.string("target")?,
        }))
    }
}

pub struct MoveFile {
    source: String,
    target: String,
}

#[async_trait]
impl Operation for MoveFile {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        let root = env.root_directory();
        let source = resolve_in_root(root, &self.source)?;
        let target = resolve_in_root(root, &self.target)?;
        debug!("Moving {} to {}", source.display(), target.display());
        env.display_to_console(&format!("Moving {} to {}\n", self.source, self.target));

        ensure_parent(&target).await?;
        tokio::fs::rename(&source, &target).await?;
        Ok(())
    }
}

pub struct MoveFileFactory;

impl OperationFactory for MoveFileFactory {
    fn key(&self) -> &str {
        "move"
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        Ok(Box::new(MoveFile {
            source: op.string("source")?,
            target: op.string("target")?,
        }))
    }
}

pub struct WriteFile {
    target: String,
    text: String,
}

#[async_trait]
impl Operation for WriteFile {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        let target = resolve_in_root(env.root_directory(), &self.target)?;
        debug!("Writing data to file: {}", target.display());
        env.display_to_console(&format!("Writing some data to file: {}\n", self.target));

        ensure_parent(&target).await?;
        tokio::fs::write(&target, self.text.as_bytes()).await?;
        Ok(())
    }
}

pub struct WriteFileFactory;

impl OperationFactory for WriteFileFactory {
    fn key(&self) -> &str {
        "writefile"
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        Ok(Box::new(WriteFile {
            target: op.string("target")?,
            text: op.optional_string("text").unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleBuffer;
    use crate::environment::StandardEnvironment;
    use crate::error::Error;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn env(dir: &TempDir) -> StandardEnvironment {
        StandardEnvironment::new(dir.path().to_path_buf(), Arc::new(ConsoleBuffer::default()))
    }

    #[tokio::test]
    async fn test_write_then_move_into_new_folder() {
        let dir = TempDir::new().unwrap();
        let env = env(&dir);

        WriteFile {
            target: "eula.txt".to_string(),
            text: "eula=true\n".to_string(),
        }
        .run(&env)
        .await
        .unwrap();

        MoveFile {
            source: "eula.txt".to_string(),
            target: "config/eula.txt".to_string(),
        }
        .run(&env)
        .await
        .unwrap();

        let moved = std::fs::read_to_string(dir.path().join("config/eula.txt")).unwrap();
        assert_eq!(moved, "eula=true\n");
        assert!(!dir.path().join("eula.txt").exists());
    }

    #[tokio::test]
    async fn test_escaping_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let env = env(&dir);
        let result = Mkdir {
            target: "../outside".to_string(),
        }
        .run(&env)
        .await;
        assert!(matches!(result, Err(Error::PathOutsideRoot(_))));
    }
}
