//! JSON frames exchanged over a workload's console channel.
//!
//! Inbound frames are flat objects keyed by `type`; outbound frames carry
//! their payload under `data`. Authorization happens before a frame gets
//! here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::environment::ServerStats;
use crate::error::Error;
use crate::workload::{FileDesc, FileItem, Workload, WorkloadRegistry};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Start,
    Stop,
    Install,
    Kill,
    Reload,
    Ping,
    Stat,
    Console {
        command: String,
    },
    File {
        action: FileAction,
        #[serde(default)]
        path: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Get,
    Delete,
    Create,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundFrame {
    Console {
        logs: Vec<String>,
    },
    Stat {
        cpu: f64,
        memory: f64,
    },
    Pong,
    File {
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<FileDesc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OutboundFrame {
    pub fn error(error: &Error) -> Self {
        OutboundFrame::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    fn file_error(error: &Error) -> Self {
        OutboundFrame::File {
            files: None,
            url: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_json(&self) -> String {
        // every variant is plain data, serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<ServerStats> for OutboundFrame {
    fn from(stats: ServerStats) -> Self {
        OutboundFrame::Stat {
            cpu: stats.cpu,
            memory: stats.memory,
        }
    }
}

/// Decode a text frame; `type` and `action` are matched case-insensitively
pub fn parse_frame(text: &str) -> Result<InboundFrame, OutboundFrame> {
    let mut value: Value = serde_json::from_str(text).map_err(|e| OutboundFrame::Error {
        code: "invalid_frame".to_string(),
        message: e.to_string(),
    })?;

    if let Some(object) = value.as_object_mut() {
        for key in ["type", "action"] {
            if let Some(Value::String(s)) = object.get_mut(key) {
                *s = s.to_lowercase();
            }
        }
    }

    serde_json::from_value(value).map_err(|e| OutboundFrame::Error {
        code: "unknown_command".to_string(),
        message: e.to_string(),
    })
}

/// Apply one inbound frame to `workload`, returning the reply if any.
///
/// Lifecycle commands reply only on failure. Installs run in the
/// background; a second install while one runs is rejected.
pub async fn dispatch(
    frame: InboundFrame,
    workload: &Arc<Workload>,
    registry: &WorkloadRegistry,
) -> Option<OutboundFrame> {
    debug!(workload = %workload.id(), "Console frame: {:?}", frame);

    let result = match frame {
        InboundFrame::Ping => return Some(OutboundFrame::Pong),
        InboundFrame::Stat => return Some(stat_frame(workload).await),
        InboundFrame::Start => workload.start().await,
        InboundFrame::Stop => workload.stop().await,
        InboundFrame::Kill => workload.kill().await,
        InboundFrame::Install => workload.spawn_install().map(|_| ()),
        InboundFrame::Reload => registry.reload(workload.id()).await,
        InboundFrame::Console { command } => {
            match workload.is_running().await {
                Ok(true) => workload.environment().execute_in_main_process(&command).await,
                // dropped silently when offline
                Ok(false) => Ok(()),
                Err(e) => Err(e),
            }
        }
        InboundFrame::File { action, path } => return Some(file_action(workload, action, &path).await),
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            warn!(workload = %workload.id(), "Console command failed: {}", e);
            Some(OutboundFrame::error(&e))
        }
    }
}

/// Sample resource usage; zeros when the workload is offline.
///
/// Blocks for the backend's sampling window.
pub async fn stat_frame(workload: &Workload) -> OutboundFrame {
    let stats = match workload.environment().get_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            debug!(workload = %workload.id(), "No stats available: {}", e);
            ServerStats::default()
        }
    };
    stats.into()
}

async fn file_action(workload: &Workload, action: FileAction, path: &str) -> OutboundFrame {
    let result = match action {
        FileAction::Get => match workload.get_item(path).await {
            Ok(FileItem::Directory(files)) => {
                return OutboundFrame::File {
                    files: Some(files),
                    url: None,
                    error: None,
                }
            }
            Ok(FileItem::File) => {
                return OutboundFrame::File {
                    files: None,
                    url: Some(path.to_string()),
                    error: None,
                }
            }
            Err(e) => Err(e),
        },
        FileAction::Delete => workload.delete_item(path).await,
        FileAction::Create => workload.create_folder(path).await,
    };

    match result {
        Ok(()) => OutboundFrame::File {
            files: None,
            url: None,
            error: None,
        },
        Err(e) => OutboundFrame::file_error(&e),
    }
}
