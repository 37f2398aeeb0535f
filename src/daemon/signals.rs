//! Control a running daemon from another process.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{Error, Result};

fn send(pid: i32, signal: Signal) -> Result<()> {
    kill(Pid::from_raw(pid), signal)
        .map_err(|e| Error::Runtime(format!("cannot signal daemon {}: {}", pid, e)))
}

/// Graceful stop-all with drain (SIGTERM)
pub fn send_shutdown(pid: i32) -> Result<()> {
    send(pid, Signal::SIGTERM)
}

/// Reload configuration without restarting workloads (SIGHUP)
pub fn send_reload(pid: i32) -> Result<()> {
    send(pid, Signal::SIGHUP)
}
