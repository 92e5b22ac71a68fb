//! Error types for instance synchronization.
//!
//! [`SyncError`] covers everything the building blocks (paths, transfers,
//! manifest parsing, configuration) can fail with. [`UpdateError`] wraps a
//! `SyncError` with the pipeline stage it happened in, so callers can tell
//! "couldn't fetch" apart from "fetched garbage".

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing an instance.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A task was started while a previous run is still active.
    #[error("task is already running")]
    AlreadyRunning,

    /// Network-level failure (connection refused, reset, body read error).
    #[error("failed to download {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// The request did not finish in time.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {}: {source}", .path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to read a file.
    #[error("failed to read {}: {source}", .path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// The manifest could not be parsed into a usable model.
    #[error("invalid version metadata in {}: {reason}", .path.display())]
    MetadataInvalid { path: PathBuf, reason: String },

    /// The manifest requires a newer launcher than this one.
    #[error("version {id} requires launcher version {required} (supported: {supported})")]
    UnsupportedManifest {
        id: String,
        required: u32,
        supported: u32,
    },

    /// Two transfers in one batch target the same file.
    #[error("destination {} is targeted by more than one transfer", .0.display())]
    DuplicateDestination(PathBuf),

    /// A path taken from remote content is not acceptable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The transfer queue was shut down before the batch could run.
    #[error("transfer queue is closed")]
    QueueClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Returns true for errors raised by the network layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::HttpStatus { .. } | Self::Timeout { .. }
        )
    }
}

/// A pipeline failure, tagged with the stage it happened in.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The version manifest could not be downloaded.
    #[error("manifest fetch failed: {0}")]
    ManifestFetch(#[source] SyncError),

    /// The downloaded manifest could not be written to the instance.
    #[error("manifest persist failed: {0}")]
    ManifestPersist(#[source] SyncError),

    /// The manifest on disk could not be loaded.
    #[error("manifest invalid or unreadable: {0}")]
    MetadataInvalid(#[source] SyncError),

    /// The manifest describes artifacts that cannot be laid out on disk.
    #[error("artifact plan rejected: {0}")]
    ArtifactPlan(#[source] SyncError),

    /// One or more artifacts could not be downloaded.
    #[error("artifact fetch failed: {0}")]
    ArtifactFetch(#[source] SyncError),
}

impl UpdateError {
    /// Human-readable message reported to the caller for this stage.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ManifestFetch(_) => "Failed to download the version description. Try again.",
            Self::ManifestPersist(_) => {
                "Failed to save the version description file (version.json)."
            }
            Self::MetadataInvalid(_) => {
                "Failed to load the version description file (version.json). \
                 It might be corrupted, missing or simply too new."
            }
            Self::ArtifactPlan(_) => "The version description lists invalid or conflicting files.",
            Self::ArtifactFetch(_) => "Failed to download the game binary and libraries. Try again.",
        }
    }

    /// The underlying cause.
    pub fn cause(&self) -> &SyncError {
        match self {
            Self::ManifestFetch(e)
            | Self::ManifestPersist(e)
            | Self::MetadataInvalid(e)
            | Self::ArtifactPlan(e)
            | Self::ArtifactFetch(e) => e,
        }
    }
}
