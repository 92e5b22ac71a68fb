//! InstSync - keeps a local game instance in sync with its remote release
//!
//! This library brings an instance up to date with a remotely hosted
//! version: it decides whether an update is needed, fetches and stores the
//! version manifest, and downloads the game binary plus every library the
//! manifest lists, reporting progress through an observable task.
//!
//! # Architecture
//!
//! ```text
//! UpdatePipeline (update)          implements Task (task)
//!         │
//!         ├── VersionCatalog (catalog)     is the version known?
//!         ├── Instance (instance)          root dir, update policy, manifest
//!         │
//!         └── TransferQueue (transfer)     one batch at a time, FIFO
//!                 └── TransferBatch        all-or-nothing group
//!                         └── TransferUnit one GET into memory or a file
//!                                 └── Transport (transport)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use instsync::{
//!     LocalInstance, ReqwestTransport, TransferQueue, UpdateConfig, UpdatePipeline, VersionList,
//! };
//!
//! let config = UpdateConfig::default();
//! let transport = Arc::new(ReqwestTransport::new(&config.transfers)?);
//! let queue = Arc::new(TransferQueue::start(transport, &config.transfers)?);
//! let catalog = Arc::new(VersionList::parse(&version_list_json)?);
//! let instance = Arc::new(LocalInstance::new("/srv/instances/survival", "1.6.4"));
//!
//! let pipeline = Arc::new(UpdatePipeline::new(config, catalog, instance, queue));
//! let mut updates = pipeline.subscribe();
//! pipeline.start()?;
//! println!("{:?}", updates.recv().await);
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod task;
pub mod transfer;
pub mod transport;
pub mod update;

pub use catalog::{VersionCatalog, VersionDescriptor, VersionList};
pub use config::{LoggingConfig, TransferConfig, UpdateConfig};
pub use error::{SyncError, SyncResult, UpdateError};
pub use instance::{Instance, LocalInstance};
pub use manifest::{LibraryReference, ManifestDocument, Platform};
pub use task::{Task, TaskCore, TaskEvent};
pub use transfer::{BatchHandle, TransferBatch, TransferQueue, TransferUnit};
pub use transport::{ReqwestTransport, Transport};
pub use update::{UpdateEvent, UpdateOutcome, UpdatePipeline, UpdateStage};
