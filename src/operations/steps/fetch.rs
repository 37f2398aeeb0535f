use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::environment::Environment;
use crate::error::Result;
use crate::operations::download::file_name;
use crate::operations::{CreateOperation, Downloader, Operation, OperationFactory};
use crate::paths::resolve_in_root;

/// Download each URL into the workload root, going through the cache when
/// one is configured
pub struct Fetch {
    files: Vec<String>,
    downloader: Arc<Downloader>,
}

#[async_trait]
impl Operation for Fetch {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        for url in &self.files {
            env.display_to_console(&format!("Downloading: {}\n", url));
            let target = resolve_in_root(env.root_directory(), &file_name(url))?;

            if self.downloader.cache_dir().is_some() {
                let cached = self.downloader.fetch_cached(url).await?;
                debug!("Copying {} to {}", cached.display(), target.display());
                tokio::fs::copy(&cached, &target).await?;
            } else {
                self.downloader.download_to(url, &target).await?;
            }
        }
        Ok(())
    }
}

pub struct FetchFactory {
    downloader: Arc<Downloader>,
}

impl FetchFactory {
    pub fn new(downloader: Arc<Downloader>) -> Self {
        Self { downloader }
    }
}

impl OperationFactory for FetchFactory {
    fn key(&self) -> &str {
        "download"
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        Ok(Box::new(Fetch {
            files: op.string_list("files")?,
            downloader: Arc::clone(&self.downloader),
        }))
    }
}
