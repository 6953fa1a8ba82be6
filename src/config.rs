//! Application configuration and logging setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};
use crate::export::thumbnail::{MAX_THUMBNAIL_SIZE, THUMBNAIL_SIZE};

/// Directory name under the platform data directory
const APP_DIR: &str = "room-scanner";
const DATABASE_FILE: &str = "catalog.db";
const STORAGE_DIR: &str = "scans";
const DEFAULT_LOG_FILTER: &str = "room_scanner=info";

/// Where the library lives and how it behaves.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base directory for the catalog and stored files
    pub data_dir: PathBuf,
    /// Catalog location; `<data_dir>/catalog.db` when unset
    pub database_path: Option<PathBuf>,
    /// Export directory; `<data_dir>/scans` when unset
    pub storage_dir: Option<PathBuf>,
    /// Edge length of generated thumbnails in pixels
    pub thumbnail_size: u32,
    /// Filter used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        data_dir.push(APP_DIR);

        Self {
            data_dir,
            database_path: None,
            storage_dir: None,
            thumbnail_size: THUMBNAIL_SIZE,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults rooted at `data_dir`
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.thumbnail_size == 0 || self.thumbnail_size > MAX_THUMBNAIL_SIZE {
            return Err(Error::Config(format!(
                "thumbnail_size must be between 1 and {}, got {}",
                MAX_THUMBNAIL_SIZE, self.thumbnail_size
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE))
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(STORAGE_DIR))
    }

    /// Create the data and storage directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        let db_parent = self.database_path().parent().map(Path::to_path_buf);
        for dir in [Some(self.data_dir.clone()), Some(self.storage_dir()), db_parent]
            .into_iter()
            .flatten()
        {
            if dir.as_os_str().is_empty() {
                continue;
            }
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::Config(format!("Failed to create {}: {}", dir.display(), e)))?;
        }
        Ok(())
    }
}

/// Install the global tracing subscriber.
///
/// RUST_LOG wins over `filter`. Calling this twice is harmless; the
/// second subscriber is ignored.
pub fn init_logging(filter: &str) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .try_init();

    if result.is_err() {
        tracing::debug!("Logging already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_default_under_data_dir() {
        let config = AppConfig::in_dir("/tmp/rooms");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/rooms/catalog.db"));
        assert_eq!(config.storage_dir(), PathBuf::from("/tmp/rooms/scans"));
        assert_eq!(config.thumbnail_size, THUMBNAIL_SIZE);
    }

    #[test]
    fn test_default_data_dir_is_app_specific() {
        assert!(AppConfig::default().data_dir.ends_with(APP_DIR));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "data_dir": "/srv/rooms", "storage_dir": "/mnt/models", "thumbnail_size": 128 }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.storage_dir(), PathBuf::from("/mnt/models"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/rooms/catalog.db"));
        assert_eq!(config.thumbnail_size, 128);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_load_errors_are_config_errors() {
        let dir = TempDir::new().unwrap();

        let missing = AppConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, Error::Config(_)));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));

        std::fs::write(&path, r#"{ "thumbnail_size": 0 }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_huge_thumbnail_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.json");
        std::fs::write(&path, r#"{ "thumbnail_size": 4294967295 }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));

        let mut config = AppConfig::in_dir(dir.path());
        config.thumbnail_size = MAX_THUMBNAIL_SIZE;
        config.validate().unwrap();
        config.thumbnail_size = MAX_THUMBNAIL_SIZE + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::in_dir(dir.path().join("data"));
        config.database_path = Some(dir.path().join("db").join("catalog.db"));
        config.ensure_dirs().unwrap();

        assert!(dir.path().join("data").is_dir());
        assert!(dir.path().join("data").join("scans").is_dir());
        assert!(dir.path().join("db").is_dir());
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("debug");
    }
}
