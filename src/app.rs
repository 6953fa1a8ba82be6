//! Top-level wiring of catalog, storage, and save coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordinator::SaveCoordinator;
use crate::error::{Error, Result};
use crate::export::storage::LocalFileStore;
use crate::export::ExportPipeline;
use crate::maintenance::{self, VerifyReport};
use crate::state::{Folder, MetadataStore};

/// Files younger than this are never swept as orphans
pub const ORPHAN_GRACE: Duration = Duration::from_secs(10 * 60);

/// Folder and scan counts at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryOverview {
    /// Folders, newest first, with the number of scans in each
    pub folders: Vec<(Folder, i64)>,
    pub total_scans: usize,
    pub unfiled: i64,
}

/// An opened scan library
#[derive(Debug, Clone)]
pub struct ScanLibrary {
    store: Arc<MetadataStore>,
    files: Arc<LocalFileStore>,
    coordinator: SaveCoordinator,
}

/// Open the catalog and storage described by `config`.
pub fn open_library(config: &AppConfig) -> Result<ScanLibrary> {
    config.validate()?;
    config.ensure_dirs()?;

    let store = Arc::new(MetadataStore::open(&config.database_path())?);
    let storage_dir = config.storage_dir();
    let files = Arc::new(LocalFileStore::new(storage_dir.clone()).map_err(|e| {
        Error::Config(format!("Failed to open {}: {}", storage_dir.display(), e))
    })?);

    let export = ExportPipeline::new(files.clone()).with_thumbnail_size(config.thumbnail_size);
    let coordinator = SaveCoordinator::new(store.clone(), export);

    tracing::info!(
        database = %store.path().display(),
        storage = %files.root().display(),
        "Library opened"
    );

    Ok(ScanLibrary {
        store,
        files,
        coordinator,
    })
}

impl ScanLibrary {
    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn files(&self) -> &Arc<LocalFileStore> {
        &self.files
    }

    pub fn coordinator(&self) -> &SaveCoordinator {
        &self.coordinator
    }

    /// Count what the catalog holds.
    pub async fn overview(&self) -> Result<LibraryOverview> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<LibraryOverview> {
            let folders = store
                .list_folders()?
                .into_iter()
                .map(|folder| -> Result<(Folder, i64)> {
                    let count = store.scan_count(Some(folder.id))?;
                    Ok((folder, count))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(LibraryOverview {
                folders,
                total_scans: store.list_all_scans()?.len(),
                unfiled: store.scan_count(None)?,
            })
        })
        .await?
    }

    /// Reconcile records with the files on disk.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let store = self.store.clone();
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || maintenance::verify_files(&store, files.as_ref()))
            .await?
    }

    /// Remove unreferenced exports older than `ORPHAN_GRACE`.
    pub async fn sweep_orphans(&self) -> Result<Vec<PathBuf>> {
        let store = self.store.clone();
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || maintenance::sweep_orphans(&store, &files, ORPHAN_GRACE))
            .await?
    }
}
