use std::path::PathBuf;
use thiserror::Error;

use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("process is already running")]
    AlreadyRunning,

    #[error("main process has not been started")]
    NotRunning,

    #[error("server is offline")]
    ServerOffline,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid workload id: {0}")]
    InvalidId(String),

    #[error("undefined environment: {0}")]
    UndefinedEnvironment(String),

    #[error("unknown operation type: {0}")]
    UnknownStepKind(String),

    #[error("invalid '{kind}' operation: {message}")]
    InvalidStep { kind: String, message: String },

    #[error("download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("step {index} ({kind}) failed: {source}")]
    StepFailed {
        index: usize,
        kind: String,
        #[source]
        source: Box<Error>,
    },

    #[error("install already in progress for {0}")]
    InstallInProgress(String),

    #[error("container image {0} is downloading, cannot execute")]
    ImageDownloading(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("path escapes the server root: {}", .0.display())]
    PathOutsideRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable identifier sent to clients in error frames and bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::AlreadyRunning => "already_running",
            Error::NotRunning => "not_running",
            Error::ServerOffline => "server_offline",
            Error::AlreadyExists(_) => "already_exists",
            Error::NotFound(_) => "not_found",
            Error::InvalidId(_) => "invalid_id",
            Error::UndefinedEnvironment(_) => "undefined_environment",
            Error::UnknownStepKind(_) => "unknown_step_kind",
            Error::InvalidStep { .. } => "invalid_step",
            Error::DownloadFailed { .. } => "download_failed",
            Error::StepFailed { .. } => "step_failed",
            Error::InstallInProgress(_) => "install_in_progress",
            Error::ImageDownloading(_) => "image_downloading",
            Error::Runtime(_) => "runtime_error",
            Error::PathOutsideRoot(_) => "path_outside_root",
            Error::Io(_) => "io_error",
            Error::Request(_) => "request_error",
            Error::Serialization(_) => "serialization_error",
            Error::Toml(_) => "config_error",
            Error::Process(_) => "process_error",
            Error::Other(_) => "error",
        }
    }

    pub fn invalid_step(kind: &str, message: impl Into<String>) -> Self {
        Error::InvalidStep {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn download_failed(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::DownloadFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for lifecycle errors that mean "already in the requested state".
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::NotRunning | Error::ServerOffline)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
