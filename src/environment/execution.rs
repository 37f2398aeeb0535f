//! Lifecycle bookkeeping shared by every execution backend.
//!
//! A backend owns one [`ExecutionCore`]. Starting an execution claims the
//! lifecycle (rejecting concurrent starts), then acquires the single-permit
//! execution latch, which the completion watcher releases once the previous
//! execution has fully drained.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::console::ConsoleBuffer;
use crate::error::{Error, Result};

/// How long the watcher waits for output pipes to drain after exit
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Created,
    Starting,
    Running,
    Stopping,
    Exited,
}

/// Outcome reported exactly once per execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Exited with success status and no error while waiting
    pub graceful: bool,
    pub exit_code: Option<i32>,
}

impl Completion {
    pub fn from_status(status: &std::process::ExitStatus) -> Self {
        Self {
            graceful: status.success(),
            exit_code: status.code(),
        }
    }

    /// Watcher failed before it could observe the exit
    pub fn abandoned() -> Self {
        Self {
            graceful: false,
            exit_code: None,
        }
    }
}

/// Awaitable completion of one execution. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionHandle {
    receiver: watch::Receiver<Option<Completion>>,
}

impl ExecutionHandle {
    pub(crate) fn channel() -> (watch::Sender<Option<Completion>>, Self) {
        let (sender, receiver) = watch::channel(None);
        (sender, Self { receiver })
    }

    /// Wait for the execution to end
    pub async fn wait(&self) -> Completion {
        let mut receiver = self.receiver.clone();
        let observed = receiver.wait_for(Option::is_some).await.map(|value| *value);
        match observed {
            Ok(value) => value.unwrap_or_else(Completion::abandoned),
            // watcher dropped the sender without publishing
            Err(_) => (*receiver.borrow()).unwrap_or_else(Completion::abandoned),
        }
    }

    /// The completion, if the execution has already ended
    pub fn try_completion(&self) -> Option<Completion> {
        *self.receiver.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.try_completion().is_some()
    }
}

struct Lifecycle {
    state: ExecutionState,
    generation: u64,
}

pub struct ExecutionCore {
    root: PathBuf,
    console: Arc<ConsoleBuffer>,
    lifecycle: Mutex<Lifecycle>,
    latch: Arc<Semaphore>,
    current: Mutex<Option<ExecutionHandle>>,
}

impl ExecutionCore {
    pub fn new(root: PathBuf, console: Arc<ConsoleBuffer>) -> Self {
        Self {
            root,
            console,
            lifecycle: Mutex::new(Lifecycle {
                state: ExecutionState::Created,
                generation: 0,
            }),
            latch: Arc::new(Semaphore::new(1)),
            current: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn console(&self) -> &Arc<ConsoleBuffer> {
        &self.console
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ExecutionState {
        self.lifecycle().state
    }

    /// Current state and generation, taken before probing liveness
    pub fn observe(&self) -> (ExecutionState, u64) {
        let lifecycle = self.lifecycle();
        (lifecycle.state, lifecycle.generation)
    }

    /// Claim the lifecycle for a new execution.
    ///
    /// `alive` is the backend's liveness probe taken after [`observe`]. A
    /// generation change in between means another start won the race.
    ///
    /// [`observe`]: ExecutionCore::observe
    pub fn claim_start(&self, observed_generation: u64, alive: bool) -> Result<u64> {
        let mut lifecycle = self.lifecycle();
        if alive
            || lifecycle.state == ExecutionState::Starting
            || lifecycle.generation != observed_generation
        {
            return Err(Error::AlreadyRunning);
        }
        lifecycle.generation += 1;
        lifecycle.state = ExecutionState::Starting;
        Ok(lifecycle.generation)
    }

    /// Block until no earlier execution is still draining
    pub async fn acquire_latch(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.latch)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("execution latch closed".to_string()))
    }

    /// Roll back a claimed start that never reached the runtime
    pub fn abort_start(&self, generation: u64) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation == generation {
            lifecycle.state = ExecutionState::Exited;
        }
    }

    pub fn mark_running(&self, generation: u64, handle: ExecutionHandle) {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.generation == generation && lifecycle.state == ExecutionState::Starting {
                lifecycle.state = ExecutionState::Running;
            }
        }
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn mark_stopping(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == ExecutionState::Running {
            lifecycle.state = ExecutionState::Stopping;
        }
    }

    fn finish(&self, generation: u64) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation == generation {
            lifecycle.state = ExecutionState::Exited;
        }
    }

    /// Handle of the most recent execution
    pub fn current(&self) -> Option<ExecutionHandle> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run `watch` to completion in the background.
    ///
    /// The state moves to `Exited`, the latch permit is released and only
    /// then is the completion published. A panicking watcher is logged and
    /// reported as a non-graceful completion.
    pub fn spawn_watcher<F>(
        self: &Arc<Self>,
        generation: u64,
        permit: OwnedSemaphorePermit,
        sender: watch::Sender<Option<Completion>>,
        watch: F,
    ) where
        F: Future<Output = Completion> + Send + 'static,
    {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let completion = match tokio::spawn(watch).await {
                Ok(completion) => completion,
                Err(e) => {
                    error!(
                        "Completion watcher for {} failed: {}",
                        core.root.display(),
                        e
                    );
                    Completion::abandoned()
                }
            };
            core.finish(generation);
            drop(permit);
            debug!(
                "Execution {} in {} completed (graceful: {})",
                generation,
                core.root.display(),
                completion.graceful
            );
            let _ = sender.send(Some(completion));
        });
    }

    /// Block until the current execution ends, killing it after `timeout`.
    ///
    /// A zero timeout waits indefinitely.
    pub async fn wait_current<K, Fut>(&self, timeout: Duration, kill: K) -> Result<()>
    where
        K: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(handle) = self.current() else {
            return Ok(());
        };
        if handle.is_finished() {
            return Ok(());
        }

        if timeout.is_zero() {
            handle.wait().await;
            return Ok(());
        }

        if tokio::time::timeout(timeout, handle.wait()).await.is_err() {
            warn!(
                "Execution in {} did not exit within {:?}, killing",
                self.root.display(),
                timeout
            );
            kill().await?;
            handle.wait().await;
        }
        Ok(())
    }
}

/// Copy a child's output pipe into the console until it closes
pub fn spawn_output_copy<R>(reader: R, console: Arc<ConsoleBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut buf = vec![0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => console.write(&String::from_utf8_lossy(&buf[..n])),
                Err(e) => {
                    debug!("Output stream closed with error: {}", e);
                    break;
                }
            }
        }
    })
}

/// Wait for output copy tasks, giving up after a short grace period
pub async fn drain_output(copies: Vec<JoinHandle<()>>) {
    let drain = futures::future::join_all(copies);
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
        debug!("Output pipes still open after exit, detaching");
    }
}
