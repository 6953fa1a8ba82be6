//! Private file storage for exported models and thumbnails.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Write-once byte storage keyed by generated file names.
///
/// Implementations must refuse to overwrite an existing name.
pub trait FileStore: Send + Sync {
    /// Store `bytes` under `name` and return the full path.
    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Read a previously written file, or None if it is gone.
    fn read(&self, path: &Path) -> Option<Vec<u8>>;

    /// Check whether a previously written file is still present.
    fn exists(&self, path: &Path) -> bool {
        self.read(path).is_some()
    }
}

/// A `FileStore` over a directory on the local disk
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Use `root` as the storage directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove a stored file. Missing files are not an error.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl FileStore for LocalFileStore {
    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage file name: {:?}", name),
            ));
        }

        let target = self.root.join(name);
        if target.exists() {
            return Err(already_exists(&target));
        }

        // Readers only ever see complete files. The hard link fails if
        // `target` appeared in the meantime.
        let tmp = self.root.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));
        let result = (|| {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::hard_link(&tmp, &target)
        })();
        let _ = fs::remove_file(&tmp);

        if let Err(e) = result {
            if e.kind() == io::ErrorKind::AlreadyExists {
                return Err(already_exists(&target));
            }
            return Err(e);
        }

        tracing::debug!(path = %target.display(), bytes = bytes.len(), "Wrote file");
        Ok(target)
    }

    fn read(&self, path: &Path) -> Option<Vec<u8>> {
        fs::read(path).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

fn already_exists(target: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{} already exists", target.display()),
    )
}
