//! Storage housekeeping.
//!
//! Saves that fail after export leave files nothing points at, and deleted
//! scans leave their files behind. These passes reconcile disk and catalog.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::error::Result;
use crate::export::model::MODEL_EXTENSION;
use crate::export::storage::{FileStore, LocalFileStore};
use crate::export::thumbnail::THUMBNAIL_EXTENSION;
use crate::state::{MetadataStore, Scan};

/// Outcome of a verification pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    /// Scans whose thumbnail reference was cleared
    pub thumbnails_cleared: usize,
    /// Scans whose model file is missing
    pub missing_models: Vec<Scan>,
}

/// Check every record against the files on disk.
///
/// Missing thumbnails are dropped from their records; missing models are
/// only reported since a scan's model reference never changes.
pub fn verify_files(store: &MetadataStore, files: &dyn FileStore) -> Result<VerifyReport> {
    Ok(VerifyReport {
        thumbnails_cleared: store.verify_thumbnails(files)?,
        missing_models: store.missing_models(files)?,
    })
}

/// Delete stored models and thumbnails that no record references.
///
/// Files modified within `grace` are left alone so a save that has
/// exported but not yet written its record is not swept out from under it.
/// Returns the removed paths.
pub fn sweep_orphans(
    store: &MetadataStore,
    files: &LocalFileStore,
    grace: Duration,
) -> Result<Vec<PathBuf>> {
    let referenced = store.referenced_files()?;
    let now = SystemTime::now();
    let mut removed = Vec::new();

    for entry in WalkDir::new(files.root())
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || referenced.contains(path) {
            continue;
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext != MODEL_EXTENSION && ext != THUMBNAIL_EXTENSION {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or(Duration::ZERO);
        if age < grace {
            continue;
        }

        match files.remove(path) {
            Ok(()) => removed.push(path.to_path_buf()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned file");
            }
        }
    }

    if !removed.is_empty() {
        tracing::info!(count = removed.len(), "Removed orphaned files");
    }

    Ok(removed)
}
