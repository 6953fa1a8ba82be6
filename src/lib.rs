//! Room scanning library.
//!
//! A capture session drives a depth-sensing device through one scan, the
//! export pipeline writes the captured room out as a model and thumbnail,
//! and the metadata store catalogs the result in folders. The save
//! coordinator ties export and catalog together.

pub mod app;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod maintenance;
pub mod state;

pub use app::{open_library, LibraryOverview, ScanLibrary};
pub use capture::{CaptureConfig, CaptureDevice, CaptureOutcome, CaptureSession, RawCapture, SessionState};
pub use config::AppConfig;
pub use coordinator::{FolderTarget, SaveCoordinator, SaveRequest};
pub use error::{Error, Result};
pub use export::ExportPipeline;
pub use state::{Folder, FolderId, MetadataStore, Scan, ScanId};
