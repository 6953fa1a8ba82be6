//! Save coordinator.
//!
//! Turns a finished capture into a catalog record: resolve the folder,
//! export the files, then insert the scan. A failed model export aborts
//! the save before any record exists.

use std::sync::Arc;

use crate::capture::{CaptureOutcome, RawCapture};
use crate::error::{Error, Result};
use crate::export::ExportPipeline;
use crate::state::data::is_valid_name;
use crate::state::{FolderId, MetadataStore, NewScan, Scan};

/// Name given to a new folder when the user left the name blank
pub const DEFAULT_FOLDER_NAME: &str = "New Folder";

/// Where a saved scan should be filed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderTarget {
    Existing(FolderId),
    /// Create a folder with this name as part of the save
    New(String),
    Unfiled,
}

/// What the user entered when saving a scan
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub name: String,
    pub target: FolderTarget,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl SaveRequest {
    pub fn new(name: impl Into<String>, target: FolderTarget) -> Self {
        Self {
            name: name.into(),
            target,
            notes: None,
            tags: None,
        }
    }

    /// Blank notes are dropped.
    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = normalize_notes(notes);
        self
    }

    /// Comma separated, as typed into a tags field.
    pub fn with_tags(mut self, tags: &str) -> Self {
        self.tags = parse_tags(tags);
        self
    }
}

/// Split a comma separated tag string, trimming and dropping blanks.
///
/// Returns None when no tags remain.
pub fn parse_tags(input: &str) -> Option<Vec<String>> {
    let tags: Vec<String> = input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    (!tags.is_empty()).then_some(tags)
}

pub fn normalize_notes(notes: &str) -> Option<String> {
    (!notes.trim().is_empty()).then(|| notes.to_string())
}

/// Runs the export then the catalog write for each save.
#[derive(Debug, Clone)]
pub struct SaveCoordinator {
    store: Arc<MetadataStore>,
    export: ExportPipeline,
}

impl SaveCoordinator {
    pub fn new(store: Arc<MetadataStore>, export: ExportPipeline) -> Self {
        Self { store, export }
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn export(&self) -> &ExportPipeline {
        &self.export
    }

    /// Save whatever a finish request produced.
    ///
    /// A cancelled session yields no scan.
    pub async fn save_outcome(&self, outcome: CaptureOutcome, request: SaveRequest) -> Result<Option<Scan>> {
        match outcome {
            CaptureOutcome::Finished(capture) => {
                self.save_captured_room(capture, request).await.map(Some)
            }
            CaptureOutcome::Cancelled => {
                tracing::debug!("Capture was cancelled, nothing to save");
                Ok(None)
            }
        }
    }

    /// Export `capture` and record it in the catalog.
    ///
    /// A folder created for `FolderTarget::New` is kept even if the export
    /// then fails. If the catalog write fails, the exported files stay on
    /// disk unreferenced until `sweep_orphans` removes them.
    pub async fn save_captured_room(&self, capture: RawCapture, request: SaveRequest) -> Result<Scan> {
        if !is_valid_name(&request.name) {
            return Err(Error::InvalidName);
        }

        let folder_id = self.resolve_folder(request.target).await?;

        let capture = Arc::new(capture);
        let exported = match self.export.run(capture.clone()).await {
            Ok(exported) => exported,
            Err(e) => {
                tracing::warn!(name = %request.name, error = %e, "Save aborted, model export failed");
                return Err(e);
            }
        };

        let new = NewScan {
            name: request.name,
            model_ref: exported.model.to_string_lossy().into_owned(),
            folder_id,
            thumbnail_ref: exported
                .thumbnail
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            tags: request.tags,
            room_size: capture.room_size(),
        };

        match self.with_store(move |store| store.create_scan(new)).await {
            Ok(scan) => {
                tracing::info!(
                    scan_id = %scan.id,
                    name = %scan.name,
                    thumbnail = scan.thumbnail_ref.is_some(),
                    "Scan saved"
                );
                Ok(scan)
            }
            Err(e) => {
                tracing::error!(
                    model = %exported.model.display(),
                    error = %e,
                    "Scan record not written, exported files left unreferenced"
                );
                Err(e)
            }
        }
    }

    async fn resolve_folder(&self, target: FolderTarget) -> Result<Option<FolderId>> {
        match target {
            FolderTarget::Unfiled => Ok(None),
            FolderTarget::Existing(id) => {
                let folder = self.with_store(move |store| store.folder(id)).await?;
                folder
                    .map(|f| Some(f.id))
                    .ok_or_else(|| Error::not_found(format!("folder {}", id)))
            }
            FolderTarget::New(name) => {
                let name = if is_valid_name(&name) {
                    name
                } else {
                    DEFAULT_FOLDER_NAME.to_string()
                };
                let folder = self.with_store(move |store| store.create_folder(&name)).await?;
                Ok(Some(folder.id))
            }
        }
    }

    /// Run a catalog call off the async executor.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MetadataStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}
