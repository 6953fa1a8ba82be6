//! Export pipeline.
//!
//! Turns a finished capture into files on private storage:
//! - the model (fatal on failure), written first
//! - a preview thumbnail (best effort), only after the model is safely stored
//!
//! Both files of one export share a fresh UUID stem, so names never collide
//! with concurrent or earlier saves.

pub mod model;
pub mod storage;
pub mod thumbnail;

use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::capture::RawCapture;
use crate::error::{Error, Result};
use storage::FileStore;

/// Files produced by one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub model: PathBuf,
    pub thumbnail: Option<PathBuf>,
}

/// Serializes captures into the file store.
#[derive(Clone)]
pub struct ExportPipeline {
    files: Arc<dyn FileStore>,
    thumbnail_size: u32,
}

impl ExportPipeline {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self {
            files,
            thumbnail_size: thumbnail::THUMBNAIL_SIZE,
        }
    }

    pub fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size;
        self
    }

    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.files
    }

    /// Run the whole export on a blocking thread.
    pub async fn run(&self, capture: Arc<RawCapture>) -> Result<ExportedFiles> {
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.export(&capture))
            .await
            .map_err(|e| Error::export(format!("Task join error: {}", e)))?
    }

    /// Export the model, then try for a thumbnail. Blocks on file I/O.
    pub fn export(&self, capture: &RawCapture) -> Result<ExportedFiles> {
        let stem = Uuid::new_v4();
        let model = self.export_model(capture, stem)?;
        let thumbnail = self.generate_thumbnail(capture, stem);
        Ok(ExportedFiles { model, thumbnail })
    }

    /// Write the model file. Any failure here is an `ExportFailed`.
    pub fn export_model(&self, capture: &RawCapture, stem: Uuid) -> Result<PathBuf> {
        let bytes = model::to_obj(capture).map_err(Error::ExportFailed)?;
        let name = format!("{}.{}", stem, model::MODEL_EXTENSION);

        let path = self
            .files
            .write(&name, &bytes)
            .map_err(|e| Error::export(format!("Failed to write {}: {}", name, e)))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Exported model");
        Ok(path)
    }

    /// Render and store a thumbnail, or None if anything goes wrong.
    pub fn generate_thumbnail(&self, capture: &RawCapture, stem: Uuid) -> Option<PathBuf> {
        let name = format!("{}.{}", stem, thumbnail::THUMBNAIL_EXTENSION);

        let bytes = match thumbnail::render_png(capture, self.thumbnail_size) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Thumbnail render failed, saving without preview");
                return None;
            }
        };

        match self.files.write(&name, &bytes) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "Generated thumbnail");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Thumbnail write failed, saving without preview");
                None
            }
        }
    }
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("thumbnail_size", &self.thumbnail_size)
            .finish_non_exhaustive()
    }
}
