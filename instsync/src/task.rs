//! Lifecycle state machine for long-running operations.
//!
//! A task embeds a [`TaskCore`] holding `{running, status, progress}` and
//! implements [`Task::execute`] with its work. [`start`] performs the
//! `Idle -> Running` transition, spawns the work on the Tokio runtime, and
//! returns without waiting for it. The `Running -> Idle` transition happens
//! when the work future finishes, however it finishes, so every run emits
//! exactly one [`TaskEvent::Started`] and one [`TaskEvent::Ended`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use instsync::task::{self, BoxFuture, Task, TaskCore};
//!
//! struct Sleeper { core: TaskCore }
//!
//! impl Task for Sleeper {
//!     fn core(&self) -> &TaskCore { &self.core }
//!
//!     fn execute(self: Arc<Self>) -> BoxFuture<'static, ()> {
//!         Box::pin(async move {
//!             self.core.set_status("Sleeping");
//!             self.core.set_progress(100);
//!         })
//!     }
//! }
//!
//! let sleeper = Arc::new(Sleeper { core: TaskCore::new() });
//! let handle = task::start(&sleeper)?;
//! handle.await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::events::EventHub;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle notifications emitted by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A run has begun.
    Started,
    /// The status text changed.
    StatusChanged(String),
    /// The progress percentage changed.
    ProgressChanged(u8),
    /// The run is over (success or failure).
    Ended,
}

/// Point-in-time view of a task's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub running: bool,
    pub status: String,
    pub progress: u8,
}

#[derive(Debug, Default)]
struct TaskState {
    running: bool,
    status: String,
    progress: u8,
}

/// Shared lifecycle state and notifications for one task.
#[derive(Debug, Default)]
pub struct TaskCore {
    state: Mutex<TaskState>,
    events: EventHub<TaskEvent>,
}

impl TaskCore {
    /// Create an idle task core.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for lifecycle notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Current status text.
    pub fn status(&self) -> String {
        self.state.lock().status.clone()
    }

    /// Current progress percentage.
    pub fn progress(&self) -> u8 {
        self.state.lock().progress
    }

    /// Current state as one consistent snapshot.
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock();
        TaskSnapshot {
            running: state.running,
            status: state.status.clone(),
            progress: state.progress,
        }
    }

    /// Update the status text and notify observers.
    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        let mut state = self.state.lock();
        state.status = status.clone();
        self.events.publish(TaskEvent::StatusChanged(status));
    }

    /// Set the progress percentage.
    ///
    /// The value is clamped to `0..=100`. Progress never goes backwards
    /// within a run: values at or below the current one are ignored and
    /// produce no notification.
    pub fn set_progress(&self, percent: i64) {
        let clamped = percent.clamp(0, 100) as u8;
        let mut state = self.state.lock();
        if clamped <= state.progress {
            return;
        }
        state.progress = clamped;
        self.events.publish(TaskEvent::ProgressChanged(clamped));
    }

    /// Set progress to `round(100 * done / total)`.
    ///
    /// A `total` of zero means the amount of work is unknown; the previous
    /// value is kept. `done > total` reports 100.
    pub fn report_fractional_progress(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = ((done as f64 / total as f64) * 100.0).round();
        self.set_progress(percent.min(100.0) as i64);
    }

    /// `Idle -> Running`. Progress left over from a previous run is reset
    /// to zero and announced right after [`TaskEvent::Started`].
    fn begin(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(SyncError::AlreadyRunning);
        }
        state.running = true;
        let previous = std::mem::replace(&mut state.progress, 0);
        self.events.publish(TaskEvent::Started);
        if previous != 0 {
            self.events.publish(TaskEvent::ProgressChanged(0));
        }
        Ok(())
    }

    /// `Running -> Idle`. Emits [`TaskEvent::Ended`] once per run.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        self.events.publish(TaskEvent::Ended);
    }
}

/// A long-running operation with an observable lifecycle.
pub trait Task: Send + Sync + 'static {
    /// The task's lifecycle state.
    fn core(&self) -> &TaskCore;

    /// The work entry point, invoked by [`start`] after the started
    /// notification. The run ends when the returned future completes.
    fn execute(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

/// Ends the run when dropped, including on panic or abort.
struct RunGuard<T: Task> {
    task: Arc<T>,
}

impl<T: Task> Drop for RunGuard<T> {
    fn drop(&mut self) {
        self.task.core().finish();
    }
}

/// Start a run of `task`.
///
/// Fails synchronously with [`SyncError::AlreadyRunning`] if a run is in
/// progress. Otherwise emits the started notification, spawns the work on
/// the current Tokio runtime and returns its join handle.
pub fn start<T: Task>(task: &Arc<T>) -> SyncResult<JoinHandle<()>> {
    let runtime = Handle::try_current().map_err(|_| {
        SyncError::InvalidConfig("tasks must be started from within a Tokio runtime".to_string())
    })?;

    task.core().begin()?;
    debug!("Task started");

    let guard = RunGuard {
        task: Arc::clone(task),
    };
    let work = Arc::clone(task).execute();

    Ok(runtime.spawn(async move {
        let _guard = guard;
        work.await;
    }))
}

/// Wait for a spawned run, logging if the work panicked.
pub async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!(error = %e, "Task work did not complete normally");
    }
}
