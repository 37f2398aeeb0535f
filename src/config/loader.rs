use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tracing::{info, warn};

use super::DaemonConfig;
use crate::error::Result;

/// Shared, reloadable daemon configuration
pub struct ConfigLoader {
    path: Option<PathBuf>,
    config: Arc<RwLock<DaemonConfig>>,
}

impl ConfigLoader {
    /// Load `path`; a missing file yields defaults, a malformed one fails
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::read(path).await?,
            None => {
                let mut config = DaemonConfig::default();
                config.merge_env_vars();
                config
            }
        };
        Ok(Self {
            path: path.map(Path::to_path_buf),
            config: Arc::new(RwLock::new(config)),
        })
    }

    async fn read(path: &Path) -> Result<DaemonConfig> {
        let mut config = match fs::read_to_string(path).await {
            Ok(content) => toml::from_str::<DaemonConfig>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                DaemonConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.merge_env_vars();
        Ok(config)
    }

    /// Re-read the file. On failure the current config stays in place.
    pub async fn reload(&self) -> bool {
        let Some(path) = &self.path else {
            info!("No configuration file to reload");
            return true;
        };
        match Self::read(path).await {
            Ok(config) => {
                *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
                info!("Reloaded configuration from {}", path.display());
                true
            }
            Err(e) => {
                warn!("Keeping previous configuration, reload failed: {}", e);
                false
            }
        }
    }

    pub fn get_config(&self) -> DaemonConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
