//! Daemon configuration.
//!
//! Read from a TOML file, then overridden by `PADDOCK_*` environment
//! variables. Every field has a default so an absent file is valid.

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::console::ConsoleConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Parent folder of every workload root
    pub data_dir: PathBuf,
    /// One JSON definition per workload
    pub definitions_dir: PathBuf,
    /// Download cache; unset disables caching
    pub cache_dir: Option<PathBuf>,
    /// Holds `operations/*.toml` extension steps
    pub modules_dir: PathBuf,
    pub web: WebConfig,
    pub console: ConsoleConfig,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub stats_sample_window: Duration,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/servers"),
            definitions_dir: PathBuf::from("./data/definitions"),
            cache_dir: Some(PathBuf::from("./data/cache")),
            modules_dir: PathBuf::from("./data/modules"),
            web: WebConfig::default(),
            console: ConsoleConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            stats_sample_window: Duration::from_secs(1),
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn merge_env_vars(&mut self) {
        if let Ok(dir) = std::env::var("PADDOCK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("PADDOCK_CACHE_DIR") {
            self.cache_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }

        if let Ok(port) = std::env::var("PADDOCK_WEB_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.web.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PADDOCK_WEB_PORT '{}'", port),
            }
        }

        if let Ok(level) = std::env::var("PADDOCK_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.web.host, self.web.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5656,
        }
    }
}
