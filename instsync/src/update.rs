//! The update pipeline.
//!
//! One run brings an instance up to date:
//!
//! ```text
//! CheckingVersion -> [unknown version]      -> Done (success, nothing to do)
//! CheckingVersion -> [manifest is current]  -> FetchingArtifacts
//! CheckingVersion -> [update needed]        -> FetchingManifest
//! FetchingManifest -> PersistingManifest -> FetchingArtifacts -> Done
//! ```
//!
//! Every stage failure ends the run with a stage-specific message. Task
//! progress is weighted: the manifest download covers 0-10% and the
//! artifact download 10-100%, so it never moves backwards between stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::VersionCatalog;
use crate::config::UpdateConfig;
use crate::error::{SyncError, SyncResult, UpdateError};
use crate::events::EventHub;
use crate::instance::{Instance, VERSION_FILE};
use crate::manifest::{ManifestDocument, Platform};
use crate::paths::{ensure_parent_exists_async, path_combine, sanitize_relative_path};
use crate::task::{self, BoxFuture, Task, TaskCore};
use crate::transfer::{BatchProgress, BatchSummary, TransferBatch, TransferQueue, TransferUnit};

/// Share of task progress given to the manifest download.
const MANIFEST_PROGRESS: (u8, u8) = (0, 10);

/// Share of task progress given to the artifact download.
const ARTIFACT_PROGRESS: (u8, u8) = (10, 100);

/// Stage of an update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Idle,
    CheckingVersion,
    FetchingManifest,
    PersistingManifest,
    FetchingArtifacts,
    Done,
}

impl UpdateStage {
    /// Get the display name for this stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CheckingVersion => "Checking version",
            Self::FetchingManifest => "Fetching manifest",
            Self::PersistingManifest => "Saving manifest",
            Self::FetchingArtifacts => "Fetching artifacts",
            Self::Done => "Done",
        }
    }
}

/// Completion notifications of an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The instance is up to date (or its version is unknown).
    Completed,
    /// The run failed; carries the user-facing message.
    Failed(String),
}

/// Result of the last finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The intended version is not in the catalog; nothing was done.
    VersionUnknown,
    /// Everything was downloaded.
    Updated {
        /// Whether a new manifest was fetched.
        manifest_refreshed: bool,
        artifacts: usize,
        bytes: u64,
    },
    /// A stage failed.
    Failed(String),
}

/// One file to download for an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTarget {
    pub url: String,
    pub destination: PathBuf,
}

/// `<base>/<id>/<id>.json`
pub fn manifest_url(versions_url: &str, id: &str) -> String {
    format!("{}/{}/{}.json", versions_url.trim_end_matches('/'), id, id)
}

/// `<base>/<id>/<id>.jar`
pub fn binary_url(versions_url: &str, id: &str) -> String {
    format!("{}/{}/{}.jar", versions_url.trim_end_matches('/'), id, id)
}

/// Every file a manifest needs, in download order: the game binary, then
/// active native libraries, then active normal libraries.
///
/// Destinations are `versions/<id>/<id>.jar` and
/// `libraries/<storage path>` under `data_dir`. Paths from the manifest that
/// would escape `data_dir` are rejected.
pub fn plan_artifacts(
    manifest: &ManifestDocument,
    platform: &Platform,
    versions_url: &str,
    data_dir: &Path,
) -> SyncResult<Vec<ArtifactTarget>> {
    let id = &manifest.id;
    let binary = sanitize_relative_path(&format!("versions/{}/{}.jar", id, id))?;

    let mut targets = vec![ArtifactTarget {
        url: binary_url(versions_url, id),
        destination: data_dir.join(binary),
    }];

    for library in manifest.artifact_libraries(platform) {
        let storage = sanitize_relative_path(&library.storage_path(platform))?;
        targets.push(ArtifactTarget {
            url: library.download_url(platform),
            destination: data_dir.join("libraries").join(storage),
        });
    }

    Ok(targets)
}

/// Orchestrates one instance update at a time.
///
/// Start it with [`UpdatePipeline::start`]; watch it through
/// [`Task::core`] for lifecycle and progress, and [`subscribe`] for the
/// completed/failed notification.
///
/// [`subscribe`]: UpdatePipeline::subscribe
pub struct UpdatePipeline {
    core: TaskCore,
    config: UpdateConfig,
    platform: Platform,
    catalog: Arc<dyn VersionCatalog>,
    instance: Arc<dyn Instance>,
    queue: Arc<TransferQueue>,
    stage: Mutex<UpdateStage>,
    outcome: Mutex<Option<UpdateOutcome>>,
    events: EventHub<UpdateEvent>,
}

impl UpdatePipeline {
    pub fn new(
        config: UpdateConfig,
        catalog: Arc<dyn VersionCatalog>,
        instance: Arc<dyn Instance>,
        queue: Arc<TransferQueue>,
    ) -> Self {
        Self {
            core: TaskCore::new(),
            config,
            platform: Platform::current(),
            catalog,
            instance,
            queue,
            stage: Mutex::new(UpdateStage::Idle),
            outcome: Mutex::new(None),
            events: EventHub::new(),
        }
    }

    /// Evaluate library rules for `platform` instead of the host.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Register for completed/failed notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateEvent> {
        self.events.subscribe()
    }

    pub fn stage(&self) -> UpdateStage {
        *self.stage.lock()
    }

    /// Outcome of the most recent finished run.
    pub fn last_outcome(&self) -> Option<UpdateOutcome> {
        self.outcome.lock().clone()
    }

    /// Begin a run. Fails with [`SyncError::AlreadyRunning`] if one is in
    /// progress.
    pub fn start(self: &Arc<Self>) -> SyncResult<JoinHandle<()>> {
        task::start(self)
    }

    async fn run(&self) {
        *self.outcome.lock() = None;

        let (outcome, event) = match self.perform().await {
            Ok(outcome) => {
                self.core.set_progress(100);
                self.core.set_status("Update complete");
                info!(outcome = ?outcome, "Update finished");
                (outcome, UpdateEvent::Completed)
            }
            Err(e) => {
                let message = e.user_message().to_string();
                warn!(stage = self.stage().name(), error = %e, "Update failed");
                self.core.set_status(message.clone());
                (UpdateOutcome::Failed(message.clone()), UpdateEvent::Failed(message))
            }
        };

        self.set_stage(UpdateStage::Done);
        *self.outcome.lock() = Some(outcome);
        self.events.publish(event);
    }

    async fn perform(&self) -> Result<UpdateOutcome, UpdateError> {
        self.set_stage(UpdateStage::CheckingVersion);
        self.core.set_status("Checking for updates");

        let intended = self.instance.intended_version();
        let Some(version) = self.catalog.resolve(&intended) else {
            info!(version = %intended, "Version is not in the catalog, nothing to update");
            return Ok(UpdateOutcome::VersionUnknown);
        };

        let version_file = path_combine(self.instance.root_directory(), VERSION_FILE);
        let manifest_refreshed = self.instance.should_update();
        if manifest_refreshed {
            let bytes = self.fetch_manifest(&version.id).await?;
            self.persist_manifest(&version_file, &bytes).await?;
        } else {
            debug!(version = %version.id, "Manifest is current");
            self.set_stage(UpdateStage::FetchingArtifacts);
        }

        let manifest = self.reload_manifest(&version_file)?;
        let summary = self.fetch_artifacts(&manifest).await?;

        Ok(UpdateOutcome::Updated {
            manifest_refreshed,
            artifacts: summary.units,
            bytes: summary.bytes,
        })
    }

    async fn fetch_manifest(&self, id: &str) -> Result<Vec<u8>, UpdateError> {
        self.set_stage(UpdateStage::FetchingManifest);
        self.core.set_status("Downloading the version description");

        let url = manifest_url(&self.config.versions_url, id);
        info!(url = %url, "Fetching version manifest");

        let mut batch = TransferBatch::new("version manifest");
        let unit = batch
            .add(TransferUnit::to_memory(url))
            .map_err(UpdateError::ManifestFetch)?;
        let mut handle = self.queue.enqueue(batch).map_err(UpdateError::ManifestFetch)?;
        handle
            .wait_with_progress(|p| self.report_progress(MANIFEST_PROGRESS, p))
            .await
            .map_err(UpdateError::ManifestFetch)?;

        Ok(unit.buffer().map(|b| b.to_vec()).unwrap_or_default())
    }

    async fn persist_manifest(&self, path: &Path, bytes: &[u8]) -> Result<(), UpdateError> {
        self.set_stage(UpdateStage::PersistingManifest);
        self.core.set_status("Saving the version description");

        ensure_parent_exists_async(path)
            .await
            .map_err(UpdateError::ManifestPersist)?;
        tokio::fs::write(path, bytes).await.map_err(|e| {
            UpdateError::ManifestPersist(SyncError::WriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Version manifest saved");
        Ok(())
    }

    fn reload_manifest(&self, path: &Path) -> Result<Arc<ManifestDocument>, UpdateError> {
        self.instance
            .reload_metadata_from(path)
            .map_err(UpdateError::MetadataInvalid)?;
        self.instance.current_manifest().ok_or_else(|| {
            UpdateError::MetadataInvalid(SyncError::MetadataInvalid {
                path: path.to_path_buf(),
                reason: "no manifest loaded after reload".to_string(),
            })
        })
    }

    async fn fetch_artifacts(&self, manifest: &ManifestDocument) -> Result<BatchSummary, UpdateError> {
        self.set_stage(UpdateStage::FetchingArtifacts);
        self.core.set_status("Downloading the game binary and libraries");
        self.core.set_progress(i64::from(ARTIFACT_PROGRESS.0));

        let targets = plan_artifacts(
            manifest,
            &self.platform,
            &self.config.versions_url,
            &self.config.data_dir,
        )
        .map_err(UpdateError::ArtifactPlan)?;

        let mut batch = TransferBatch::new("game binary and libraries");
        for target in targets {
            batch
                .add(TransferUnit::to_file(target.url, target.destination))
                .map_err(UpdateError::ArtifactPlan)?;
        }
        info!(version = %manifest.id, units = batch.len(), "Fetching artifacts");

        let mut handle = self.queue.enqueue(batch).map_err(UpdateError::ArtifactFetch)?;
        handle
            .wait_with_progress(|p| self.report_progress(ARTIFACT_PROGRESS, p))
            .await
            .map_err(UpdateError::ArtifactFetch)
    }

    /// Map batch progress into this stage's share of the task progress.
    fn report_progress(&self, (low, high): (u8, u8), progress: &BatchProgress) {
        let span = f64::from(high - low);
        let value = f64::from(low) + span * progress.percent() / 100.0;
        self.core.set_progress(value.floor() as i64);
    }

    fn set_stage(&self, stage: UpdateStage) {
        let previous = std::mem::replace(&mut *self.stage.lock(), stage);
        if previous != stage {
            debug!(from = previous.name(), to = stage.name(), "Update stage changed");
        }
    }
}

impl Task for UpdatePipeline {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn execute(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.run().await })
    }
}

impl std::fmt::Debug for UpdatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatePipeline")
            .field("stage", &self.stage())
            .field("task", &self.core.snapshot())
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}
