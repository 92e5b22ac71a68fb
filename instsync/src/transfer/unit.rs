//! A single network fetch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::events::EventHub;
use crate::paths::ensure_parent_exists_async;
use crate::transport::{Transport, TransportResponse};

/// Where a unit puts the bytes it receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// Collect into memory.
    Memory,
    /// Write to a file, truncating anything already there.
    File(PathBuf),
}

/// Terminal state of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// Notifications emitted by a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    /// Bytes arrived. `total` is 0 when the size is unknown.
    Progress { done: u64, total: u64 },
    Succeeded,
    Failed(String),
}

#[derive(Debug)]
struct UnitState {
    outcome: UnitOutcome,
    buffer: Option<Bytes>,
}

/// One fetch of `source` into memory or a file.
///
/// Byte counters are updated as data arrives. A unit runs at most once.
#[derive(Debug)]
pub struct TransferUnit {
    source: String,
    sink: Sink,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    started: AtomicBool,
    state: Mutex<UnitState>,
    events: EventHub<UnitEvent>,
}

impl TransferUnit {
    fn new(source: impl Into<String>, sink: Sink) -> Self {
        Self {
            source: source.into(),
            sink,
            bytes_done: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            started: AtomicBool::new(false),
            state: Mutex::new(UnitState {
                outcome: UnitOutcome::Pending,
                buffer: None,
            }),
            events: EventHub::new(),
        }
    }

    /// Fetch `source` into an in-memory buffer.
    pub fn to_memory(source: impl Into<String>) -> Self {
        Self::new(source, Sink::Memory)
    }

    /// Fetch `source` into the file at `destination`.
    pub fn to_file(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self::new(source, Sink::File(destination.into()))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    /// Destination path for file-backed units.
    pub fn destination(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File(path) => Some(path),
            Sink::Memory => None,
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::SeqCst)
    }

    /// Expected size in bytes, 0 if unknown.
    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::SeqCst)
    }

    pub fn outcome(&self) -> UnitOutcome {
        self.state.lock().outcome.clone()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state.lock().outcome, UnitOutcome::Pending)
    }

    /// The received bytes of a successful in-memory unit.
    pub fn buffer(&self) -> Option<Bytes> {
        self.state.lock().buffer.clone()
    }

    /// Register for this unit's notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UnitEvent> {
        self.events.subscribe()
    }

    /// Record a size learned before the fetch (e.g. from a HEAD probe).
    pub(crate) fn set_expected_total(&self, total: u64) {
        self.bytes_total.store(total, Ordering::SeqCst);
    }

    /// Perform the fetch. Returns the number of bytes received.
    pub(crate) async fn run(&self, transport: &dyn Transport) -> SyncResult<u64> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SyncError::InvalidConfig(format!(
                "transfer of {} has already run",
                self.source
            )));
        }

        match self.fetch(transport).await {
            Ok(bytes) => {
                self.state.lock().outcome = UnitOutcome::Succeeded;
                self.events.publish(UnitEvent::Succeeded);
                debug!(url = %self.source, bytes, "Transfer complete");
                Ok(bytes)
            }
            Err(e) => {
                let reason = e.to_string();
                self.state.lock().outcome = UnitOutcome::Failed(reason.clone());
                self.events.publish(UnitEvent::Failed(reason));
                warn!(url = %self.source, error = %e, "Transfer failed");
                Err(e)
            }
        }
    }

    async fn fetch(&self, transport: &dyn Transport) -> SyncResult<u64> {
        let response = transport.get(&self.source).await?;
        if let Some(len) = response.content_length.filter(|len| *len > 0) {
            self.bytes_total.store(len, Ordering::SeqCst);
        }

        match &self.sink {
            Sink::Memory => {
                let data = self.receive_to_memory(response).await?;
                let len = data.len() as u64;
                self.state.lock().buffer = Some(data);
                Ok(len)
            }
            Sink::File(path) => {
                let result = self.receive_to_file(response, path).await;
                if result.is_err() {
                    // No resume support, so a partial file is useless.
                    let _ = tokio::fs::remove_file(path).await;
                }
                result
            }
        }
    }

    async fn receive_to_memory(&self, mut response: TransportResponse) -> SyncResult<Bytes> {
        let mut data = BytesMut::new();
        while let Some(chunk) = response.body.next().await {
            let chunk = chunk?;
            data.extend_from_slice(&chunk);
            self.record_chunk(chunk.len());
        }
        Ok(data.freeze())
    }

    async fn receive_to_file(&self, mut response: TransportResponse, path: &Path) -> SyncResult<u64> {
        ensure_parent_exists_async(path).await?;

        let write_err = |e: std::io::Error| SyncError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        let file = File::create(path).await.map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        while let Some(chunk) = response.body.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await.map_err(write_err)?;
            self.record_chunk(chunk.len());
        }
        writer.flush().await.map_err(write_err)?;
        writer.into_inner().sync_all().await.map_err(write_err)?;

        Ok(self.bytes_done())
    }

    fn record_chunk(&self, len: usize) {
        let done = self.bytes_done.fetch_add(len as u64, Ordering::SeqCst) + len as u64;
        self.events.publish(UnitEvent::Progress {
            done,
            total: self.bytes_total(),
        });
    }
}
