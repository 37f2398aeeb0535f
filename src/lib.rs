//! # Paddock
//!
//! Host agent that provisions, runs and streams the console of game-server
//! style workloads, either as native processes or inside containers.
//!
//! ## Modules
//!
//! - `config` - Daemon configuration file and environment overrides
//! - `console` - Replayable console buffer and the console channel protocol
//! - `daemon` - Bootstrap, HTTP/websocket adapter and host signal handling
//! - `environment` - Execution backends (native process, docker)
//! - `operations` - Provisioning pipeline engine and its step catalog
//! - `paths` - Confinement of user-supplied paths to a workload root
//! - `subprocess` - Process runner abstraction used for container CLI calls
//! - `tokens` - `${name}` placeholder substitution
//! - `workload` - Workload definitions, lifecycle and registry
pub mod config;
pub mod console;
pub mod daemon;
pub mod environment;
pub mod error;
pub mod operations;
pub mod paths;
pub mod subprocess;
pub mod tokens;
pub mod workload;

pub use error::{Error, Result};
