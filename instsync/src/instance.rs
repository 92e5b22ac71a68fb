//! The local installation being updated.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::manifest::ManifestDocument;
use crate::paths::path_combine;

/// File name of the version manifest inside an instance root.
pub const VERSION_FILE: &str = "version.json";

/// What the update pipeline needs from an instance.
pub trait Instance: Send + Sync {
    /// Root directory of the instance.
    fn root_directory(&self) -> &Path;

    /// Version identifier the instance should be on.
    fn intended_version(&self) -> String;

    /// Whether the manifest must be fetched again.
    fn should_update(&self) -> bool;

    /// Load version metadata from `path`, replacing the current manifest.
    fn reload_metadata_from(&self, path: &Path) -> SyncResult<()>;

    /// The most recently loaded manifest.
    fn current_manifest(&self) -> Option<Arc<ManifestDocument>>;
}

/// An instance stored in a directory, with its manifest at
/// `<root>/version.json`.
#[derive(Debug)]
pub struct LocalInstance {
    root: PathBuf,
    intended: RwLock<String>,
    force_update: AtomicBool,
    manifest: RwLock<Option<Arc<ManifestDocument>>>,
}

impl LocalInstance {
    pub fn new(root: impl Into<PathBuf>, intended_version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            intended: RwLock::new(intended_version.into()),
            force_update: AtomicBool::new(false),
            manifest: RwLock::new(None),
        }
    }

    /// Path of the instance's version manifest.
    pub fn version_file(&self) -> PathBuf {
        path_combine(&self.root, VERSION_FILE)
    }

    pub fn set_intended_version(&self, id: impl Into<String>) {
        *self.intended.write() = id.into();
    }

    /// Make the next update refetch the manifest even if it looks current.
    /// The flag clears once a manifest has been reloaded successfully.
    pub fn set_force_update(&self, force: bool) {
        self.force_update.store(force, Ordering::SeqCst);
    }

    /// Version id of the loaded manifest, or failing that the one on disk.
    pub fn current_version_id(&self) -> Option<String> {
        if let Some(manifest) = self.manifest.read().as_ref() {
            return Some(manifest.id.clone());
        }
        ManifestDocument::load(&self.version_file())
            .ok()
            .map(|manifest| manifest.id)
    }
}

impl Instance for LocalInstance {
    fn root_directory(&self) -> &Path {
        &self.root
    }

    fn intended_version(&self) -> String {
        self.intended.read().clone()
    }

    fn should_update(&self) -> bool {
        if self.force_update.load(Ordering::SeqCst) {
            return true;
        }
        let intended = self.intended_version();
        match self.current_version_id() {
            Some(current) => current != intended,
            None => true,
        }
    }

    fn reload_metadata_from(&self, path: &Path) -> SyncResult<()> {
        match ManifestDocument::load(path) {
            Ok(manifest) => {
                debug!(path = %path.display(), id = %manifest.id, "Version metadata loaded");
                *self.manifest.write() = Some(Arc::new(manifest));
                self.force_update.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load version metadata");
                Err(e)
            }
        }
    }

    fn current_manifest(&self) -> Option<Arc<ManifestDocument>> {
        self.manifest.read().clone()
    }
}
