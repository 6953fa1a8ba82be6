//! Error types shared by the capture, export, and catalog layers.

use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between starting a scan and reading it back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A capture session is already running (here or elsewhere in the process).
    #[error("A capture session is already active")]
    SessionAlreadyActive,

    /// Finish or cancel was requested while no scan was in progress.
    #[error("No capture session is in progress")]
    SessionNotActive,

    /// The capture device reported an error.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// The model file could not be produced or written.
    #[error("Export failed: {0}")]
    ExportFailed(String),

    /// The catalog database rejected a read or write.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Folder or scan names must contain at least one non-whitespace character.
    #[error("Name must not be blank")]
    InvalidName,

    /// A scan was created without a model file reference.
    #[error("Scan has no exported model")]
    MissingModel,

    /// An id named no record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn export(msg: impl Into<String>) -> Self {
        Self::ExportFailed(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::PersistenceError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::PersistenceError(format!("Task join error: {}", e))
    }
}
