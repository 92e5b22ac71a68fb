//! Groups of transfers that succeed or fail together.
//!
//! A [`TransferBatch`] is assembled first, then handed to a
//! [`TransferQueue`](super::TransferQueue), which consumes it and returns a
//! [`BatchHandle`]. Because submission consumes the builder, units can only
//! be added before a batch is submitted.
//!
//! Aggregate progress is byte based while every unit's size is known, and
//! falls back to counting finished units otherwise (see [`BatchProgress`]).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::unit::TransferUnit;
use crate::error::{SyncError, SyncResult};
use crate::events::EventHub;

/// An ordered set of transfers that must all succeed.
#[derive(Debug)]
pub struct TransferBatch {
    name: String,
    units: Vec<Arc<TransferUnit>>,
    destinations: HashSet<PathBuf>,
}

impl TransferBatch {
    /// Create an empty batch. `name` is used in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            destinations: HashSet::new(),
        }
    }

    /// Append a unit and return a shared handle to it.
    ///
    /// Fails with [`SyncError::DuplicateDestination`] if another unit in the
    /// batch already writes to the same file.
    pub fn add(&mut self, unit: TransferUnit) -> SyncResult<Arc<TransferUnit>> {
        if let Some(dest) = unit.destination() {
            if !self.destinations.insert(dest.to_path_buf()) {
                return Err(SyncError::DuplicateDestination(dest.to_path_buf()));
            }
        }
        let unit = Arc::new(unit);
        self.units.push(Arc::clone(&unit));
        Ok(unit)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units in the order they were added.
    pub fn units(&self) -> &[Arc<TransferUnit>] {
        &self.units
    }
}

/// Outcome of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// Aggregated progress of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub bytes_done: u64,
    /// Sum of known unit sizes.
    pub bytes_total: u64,
    pub units_completed: usize,
    pub units_total: usize,
    /// Whether every unit's size is known.
    pub sizes_known: bool,
}

impl BatchProgress {
    /// Progress as a percentage in `0.0..=100.0`.
    ///
    /// Uses bytes when every size is known and falls back to the share of
    /// finished units otherwise. An empty batch is complete.
    pub fn percent(&self) -> f64 {
        if self.units_total == 0 {
            return 100.0;
        }
        let ratio = if self.sizes_known && self.bytes_total > 0 {
            self.bytes_done as f64 / self.bytes_total as f64
        } else {
            self.units_completed as f64 / self.units_total as f64
        };
        (ratio * 100.0).clamp(0.0, 100.0)
    }
}

/// Notifications emitted by a submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Aggregate progress moved by at least one percent.
    Progress(BatchProgress),
    /// Every unit succeeded.
    Succeeded,
    /// The first failure. `url` is the failing unit's source.
    Failed { url: String, reason: String },
}

/// Totals of a successful batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub units: usize,
    pub bytes: u64,
}

#[derive(Debug)]
struct BatchState {
    outcome: BatchOutcome,
    completed: usize,
    bytes: u64,
    reported_percent: Option<u8>,
    error: Option<SyncError>,
}

/// Shared state of a batch once it has been submitted.
#[derive(Debug)]
pub(crate) struct ActiveBatch {
    name: String,
    units: Vec<Arc<TransferUnit>>,
    state: Mutex<BatchState>,
    events: EventHub<BatchEvent>,
}

impl ActiveBatch {
    pub(crate) fn new(batch: TransferBatch) -> Self {
        Self {
            name: batch.name,
            units: batch.units,
            state: Mutex::new(BatchState {
                outcome: BatchOutcome::Pending,
                completed: 0,
                bytes: 0,
                reported_percent: None,
                error: None,
            }),
            events: EventHub::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn units(&self) -> &[Arc<TransferUnit>] {
        &self.units
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<BatchEvent> {
        self.events.subscribe()
    }

    pub(crate) fn outcome(&self) -> BatchOutcome {
        self.state.lock().outcome.clone()
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(self.state.lock().outcome, BatchOutcome::Failed(_))
    }

    pub(crate) fn progress(&self) -> BatchProgress {
        let completed = self.state.lock().completed;
        let mut progress = BatchProgress {
            units_completed: completed,
            units_total: self.units.len(),
            sizes_known: true,
            ..Default::default()
        };
        for unit in &self.units {
            let total = unit.bytes_total();
            progress.bytes_done += unit.bytes_done();
            progress.bytes_total += total;
            if total == 0 {
                progress.sizes_known = false;
            }
        }
        progress
    }

    /// Publish progress if the whole percentage has moved up.
    pub(crate) fn refresh_progress(&self) {
        let progress = self.progress();
        let percent = progress.percent().floor() as u8;
        let mut state = self.state.lock();
        if state.reported_percent.map_or(true, |last| percent > last) {
            state.reported_percent = Some(percent);
            self.events.publish(BatchEvent::Progress(progress));
        }
    }

    /// Record a unit's result. The first failure fixes the outcome.
    pub(crate) fn unit_finished(&self, unit: &TransferUnit, result: SyncResult<u64>) {
        match result {
            Ok(bytes) => {
                let all_done = {
                    let mut state = self.state.lock();
                    state.completed += 1;
                    state.bytes += bytes;
                    state.completed == self.units.len()
                };
                self.refresh_progress();

                let mut state = self.state.lock();
                if all_done && state.outcome == BatchOutcome::Pending {
                    state.outcome = BatchOutcome::Succeeded;
                    self.events.publish(BatchEvent::Succeeded);
                    debug!(batch = %self.name, units = self.units.len(), bytes = state.bytes, "Batch complete");
                }
            }
            Err(e) => self.fail(unit.source(), e),
        }
    }

    /// Fail the batch unless it already has an outcome.
    pub(crate) fn fail(&self, url: &str, error: SyncError) {
        let mut state = self.state.lock();
        if state.outcome != BatchOutcome::Pending {
            return;
        }
        let reason = error.to_string();
        warn!(batch = %self.name, url = %url, error = %reason, "Batch failed");
        state.outcome = BatchOutcome::Failed(reason.clone());
        state.error = Some(error);
        self.events.publish(BatchEvent::Failed {
            url: url.to_string(),
            reason,
        });
    }

    /// Mark an empty batch as done.
    pub(crate) fn succeed_empty(&self) {
        let mut state = self.state.lock();
        if state.outcome == BatchOutcome::Pending {
            state.outcome = BatchOutcome::Succeeded;
            state.reported_percent = Some(100);
            self.events.publish(BatchEvent::Progress(BatchProgress {
                sizes_known: true,
                ..Default::default()
            }));
            self.events.publish(BatchEvent::Succeeded);
        }
    }

    /// Stop delivering events.
    pub(crate) fn close(&self) {
        self.events.close();
    }

    fn take_error(&self) -> Option<SyncError> {
        self.state.lock().error.take()
    }

    fn summary(&self) -> BatchSummary {
        let state = self.state.lock();
        BatchSummary {
            units: state.completed,
            bytes: state.bytes,
        }
    }
}

/// Caller's view of a submitted batch.
///
/// Events are buffered from the moment of submission, so none are missed
/// even if the batch starts before the caller begins waiting.
#[derive(Debug)]
pub struct BatchHandle {
    batch: Arc<ActiveBatch>,
    events: mpsc::UnboundedReceiver<BatchEvent>,
}

impl BatchHandle {
    pub(crate) fn new(batch: Arc<ActiveBatch>) -> Self {
        let events = batch.subscribe();
        Self { batch, events }
    }

    pub fn name(&self) -> &str {
        self.batch.name()
    }

    pub fn units(&self) -> &[Arc<TransferUnit>] {
        self.batch.units()
    }

    pub fn outcome(&self) -> BatchOutcome {
        self.batch.outcome()
    }

    pub fn progress(&self) -> BatchProgress {
        self.batch.progress()
    }

    /// Next event, or `None` once the batch is finished and drained.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Wait for the batch outcome, ignoring progress.
    pub async fn wait(&mut self) -> SyncResult<BatchSummary> {
        self.wait_with_progress(|_| {}).await
    }

    /// Wait for the batch outcome, passing each progress update to
    /// `on_progress`.
    ///
    /// Returns the first unit error on failure.
    pub async fn wait_with_progress<F>(&mut self, mut on_progress: F) -> SyncResult<BatchSummary>
    where
        F: FnMut(&BatchProgress),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                BatchEvent::Progress(progress) => on_progress(&progress),
                BatchEvent::Succeeded => return Ok(self.batch.summary()),
                BatchEvent::Failed { url, reason } => {
                    return Err(self
                        .batch
                        .take_error()
                        .unwrap_or_else(|| SyncError::Transport { url, reason }));
                }
            }
        }
        Err(SyncError::QueueClosed)
    }
}
