//! Minecraft server resolver: release name, then version manifest, then jar

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::operations::{CreateOperation, Downloader, Operation, OperationFactory};
use crate::paths::resolve_in_root;

pub const MOJANG_MANIFEST_URL: &str =
    "https://launchermeta.mojang.com/mc/game/version_manifest.json";

#[derive(Debug, Deserialize)]
struct LauncherManifest {
    latest: LatestVersions,
    versions: Vec<LauncherVersion>,
}

#[derive(Debug, Deserialize)]
struct LatestVersions {
    release: String,
    snapshot: String,
}

#[derive(Debug, Deserialize)]
struct LauncherVersion {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VersionManifest {
    downloads: HashMap<String, Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    url: String,
}

pub struct MojangDl {
    version: String,
    target: String,
    manifest_url: String,
    downloader: Arc<Downloader>,
}

impl MojangDl {
    async fn resolve_artifact(&self, env: &dyn Environment) -> Result<String> {
        let manifest: LauncherManifest = self.downloader.fetch_json(&self.manifest_url).await?;
        let wanted = match self.version.as_str() {
            "release" | "latest" => manifest.latest.release.as_str(),
            "snapshot" => manifest.latest.snapshot.as_str(),
            other => other,
        };

        let Some(version) = manifest.versions.iter().find(|v| v.id == wanted) else {
            env.display_to_console(&format!("Could not locate version {}\n", wanted));
            return Err(Error::invalid_step(
                "mojangdl",
                format!("version not located: {}", self.version),
            ));
        };

        debug!("Version {} json located, downloading from {}", version.id, version.url);
        env.display_to_console(&format!(
            "Version {} json located, downloading from {}\n",
            version.id, version.url
        ));

        let details: VersionManifest = self.downloader.fetch_json(&version.url).await?;
        let server = details.downloads.get("server").ok_or_else(|| {
            Error::download_failed(&version.url, "no server download for this version")
        })?;
        Ok(server.url.clone())
    }
}

#[async_trait]
impl Operation for MojangDl {
    async fn run(&self, env: &dyn Environment) -> Result<()> {
        let url = self.resolve_artifact(env).await?;
        env.display_to_console(&format!("Version jar located, downloading from {}\n", url));
        env.display_to_console(&format!("Downloading: {}\n", url));

        let target = resolve_in_root(env.root_directory(), &self.target)?;
        self.downloader.download_to(&url, &target).await?;
        Ok(())
    }
}

pub struct MojangDlFactory {
    downloader: Arc<Downloader>,
}

impl MojangDlFactory {
    pub fn new(downloader: Arc<Downloader>) -> Self {
        Self { downloader }
    }
}

impl OperationFactory for MojangDlFactory {
    fn key(&self) -> &str {
        "mojangdl"
    }

    fn create(&self, op: CreateOperation) -> Result<Box<dyn Operation>> {
        Ok(Box::new(MojangDl {
            version: op.string("version")?,
            target: op.string("target")?,
            manifest_url: op
                .optional_string("manifest")
                .unwrap_or_else(|| MOJANG_MANIFEST_URL.to_string()),
            downloader: Arc::clone(&self.downloader),
        }))
    }
}
