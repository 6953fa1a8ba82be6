use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use super::data::{
    is_valid_name, tags_from_json, tags_to_json, Folder, FolderId, NewScan, Scan, ScanId,
    SearchResults,
};
use super::schema;
use crate::error::{Error, Result};
use crate::export::storage::FileStore;

const SCAN_COLUMNS: &str = "id, name, created_at, model_ref, thumbnail_ref, room_size, notes, tags_json, folder_id";

/// The MetadataStore manages the SQLite scan catalog.
/// It stores folders, scans, and references to exported files.
///
/// Every mutation runs in its own transaction and is committed before
/// the call returns. The connection sits behind a mutex, so one store
/// instance applies at most one mutation at a time.
pub struct MetadataStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl MetadataStore {
    /// Open or create the catalog at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::PersistenceError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::migrate(&conn)?;

        tracing::info!(path = %path.display(), "Catalog opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Open a throwaway in-memory catalog.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::PersistenceError(e.to_string()))
    }

    // ── Folders ──

    /// Create a folder. Blank names are rejected.
    pub fn create_folder(&self, name: &str) -> Result<Folder> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName);
        }

        let folder = Folder {
            id: FolderId::new(),
            name: name.trim().to_string(),
            created_at: now(),
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO folders (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![
                folder.id.to_string(),
                folder.name,
                folder.created_at.timestamp_micros()
            ],
        )?;
        tx.commit()?;

        tracing::info!(folder_id = %folder.id, name = %folder.name, "Folder created");
        Ok(folder)
    }

    pub fn rename_folder(&self, id: FolderId, name: &str) -> Result<Folder> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE folders SET name = ?1 WHERE id = ?2",
            params![name.trim(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("folder {}", id)));
        }
        let folder = query_folder(&tx, id)?.ok_or_else(|| Error::not_found(format!("folder {}", id)))?;
        tx.commit()?;

        Ok(folder)
    }

    /// Delete a folder. Its scans are kept and become unfiled.
    ///
    /// Returns the number of scans that were unfiled.
    pub fn delete_folder(&self, id: FolderId) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let unfiled = tx.execute(
            "UPDATE scans SET folder_id = NULL WHERE folder_id = ?1",
            params![id.to_string()],
        )?;
        let deleted = tx.execute("DELETE FROM folders WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("folder {}", id)));
        }
        tx.commit()?;

        tracing::info!(folder_id = %id, unfiled, "Folder deleted");
        Ok(unfiled)
    }

    pub fn folder(&self, id: FolderId) -> Result<Option<Folder>> {
        let conn = self.conn()?;
        query_folder(&conn, id)
    }

    /// All folders, newest first
    pub fn list_folders(&self) -> Result<Vec<Folder>> {
        let conn = self.conn()?;
        select_folders(&conn)
    }

    // ── Scans ──

    /// Insert a scan record.
    ///
    /// Fails with `InvalidName` for a blank name, `MissingModel` for an
    /// empty model reference, and `NotFound` if the folder does not exist.
    pub fn create_scan(&self, new: NewScan) -> Result<Scan> {
        if !is_valid_name(&new.name) {
            return Err(Error::InvalidName);
        }
        if new.model_ref.trim().is_empty() {
            return Err(Error::MissingModel);
        }

        let scan = Scan {
            id: ScanId::new(),
            name: new.name.trim().to_string(),
            created_at: now(),
            model_ref: new.model_ref,
            thumbnail_ref: new.thumbnail_ref,
            room_size: new.room_size,
            notes: new.notes.filter(|n| !n.trim().is_empty()),
            tags: normalize_tags(new.tags),
            folder_id: new.folder_id,
        };
        let tags_json = tags_to_json(&scan.tags).map_err(|e| Error::PersistenceError(e.to_string()))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(folder_id) = scan.folder_id {
            ensure_folder(&tx, folder_id)?;
        }
        tx.execute(
            "INSERT INTO scans (id, name, created_at, model_ref, thumbnail_ref, room_size, notes, tags_json, folder_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                scan.id.to_string(),
                scan.name,
                scan.created_at.timestamp_micros(),
                scan.model_ref,
                scan.thumbnail_ref,
                scan.room_size,
                scan.notes,
                tags_json,
                scan.folder_id.map(|f| f.to_string()),
            ],
        )?;
        tx.commit()?;

        tracing::info!(scan_id = %scan.id, name = %scan.name, "Scan created");
        Ok(scan)
    }

    pub fn rename_scan(&self, id: ScanId, name: &str) -> Result<Scan> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName);
        }
        self.update_scan(id, "UPDATE scans SET name = ?1 WHERE id = ?2", name.trim().to_string())
    }

    /// Replace the notes. Blank notes are stored as none.
    pub fn set_notes(&self, id: ScanId, notes: Option<String>) -> Result<Scan> {
        let notes = notes.filter(|n| !n.trim().is_empty());
        self.update_scan(id, "UPDATE scans SET notes = ?1 WHERE id = ?2", notes)
    }

    pub fn set_tags(&self, id: ScanId, tags: Option<Vec<String>>) -> Result<Scan> {
        let tags_json = tags_to_json(&normalize_tags(tags))
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        self.update_scan(id, "UPDATE scans SET tags_json = ?1 WHERE id = ?2", tags_json)
    }

    /// Move a scan into `folder`, or out of any folder with None.
    pub fn set_folder(&self, id: ScanId, folder: Option<FolderId>) -> Result<Scan> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(folder_id) = folder {
            ensure_folder(&tx, folder_id)?;
        }
        let changed = tx.execute(
            "UPDATE scans SET folder_id = ?1 WHERE id = ?2",
            params![folder.map(|f| f.to_string()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("scan {}", id)));
        }
        let scan = query_scan(&tx, id)?.ok_or_else(|| Error::not_found(format!("scan {}", id)))?;
        tx.commit()?;

        tracing::debug!(scan_id = %id, folder_id = ?folder, "Scan moved");
        Ok(scan)
    }

    /// Delete a scan record and return what it held.
    ///
    /// The exported files stay on disk; `sweep_orphans` reclaims them.
    pub fn delete_scan(&self, id: ScanId) -> Result<Scan> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let scan = query_scan(&tx, id)?.ok_or_else(|| Error::not_found(format!("scan {}", id)))?;
        tx.execute("DELETE FROM scans WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        tracing::info!(scan_id = %id, "Scan deleted");
        Ok(scan)
    }

    pub fn scan(&self, id: ScanId) -> Result<Option<Scan>> {
        let conn = self.conn()?;
        query_scan(&conn, id)
    }

    /// Scans in `folder` (or unfiled scans for None), newest first
    pub fn list_scans(&self, folder: Option<FolderId>) -> Result<Vec<Scan>> {
        let conn = self.conn()?;
        let scans = match folder {
            Some(folder_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scans WHERE folder_id = ?1 ORDER BY created_at DESC, rowid DESC",
                    SCAN_COLUMNS
                ))?;
                let rows = stmt.query_map(params![folder_id.to_string()], scan_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scans WHERE folder_id IS NULL ORDER BY created_at DESC, rowid DESC",
                    SCAN_COLUMNS
                ))?;
                let rows = stmt.query_map([], scan_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(scans)
    }

    /// Every scan regardless of folder, newest first
    pub fn list_all_scans(&self) -> Result<Vec<Scan>> {
        let conn = self.conn()?;
        select_all_scans(&conn)
    }

    /// Number of scans in `folder` (or unfiled scans for None)
    pub fn scan_count(&self, folder: Option<FolderId>) -> Result<i64> {
        let conn = self.conn()?;
        let count = match folder {
            Some(folder_id) => conn.query_row(
                "SELECT COUNT(*) FROM scans WHERE folder_id = ?1",
                params![folder_id.to_string()],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM scans WHERE folder_id IS NULL",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    // ── Search ──

    /// Case-insensitive substring search.
    ///
    /// A scan matches on its name or notes. A folder matches on its name,
    /// or when any scan inside it matches. A blank query matches everything.
    pub fn search(&self, query: &str) -> Result<SearchResults> {
        // Both lists from one snapshot
        let (folders, scans) = {
            let conn = self.conn()?;
            (select_folders(&conn)?, select_all_scans(&conn)?)
        };

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(SearchResults { folders, scans });
        }
        let contains = |haystack: &str| haystack.to_lowercase().contains(&needle);

        let scans: Vec<Scan> = scans
            .into_iter()
            .filter(|s| contains(&s.name) || s.notes.as_deref().is_some_and(contains))
            .collect();
        let hit_folders: HashSet<FolderId> = scans.iter().filter_map(|s| s.folder_id).collect();
        let folders = folders
            .into_iter()
            .filter(|f| contains(&f.name) || hit_folders.contains(&f.id))
            .collect();

        Ok(SearchResults { folders, scans })
    }

    // ── File verification ──

    /// Clear thumbnail references whose file no longer exists.
    ///
    /// Returns the number of scans that lost their thumbnail.
    pub fn verify_thumbnails(&self, files: &dyn FileStore) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let cached: Vec<(String, String)> = {
            let mut stmt =
                tx.prepare("SELECT id, thumbnail_ref FROM scans WHERE thumbnail_ref IS NOT NULL")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut reset_count = 0;
        for (id, thumbnail_ref) in cached {
            if !files.exists(Path::new(&thumbnail_ref)) {
                tx.execute(
                    "UPDATE scans SET thumbnail_ref = NULL WHERE id = ?1",
                    params![id],
                )?;
                reset_count += 1;
            }
        }
        tx.commit()?;

        if reset_count > 0 {
            tracing::warn!(count = reset_count, "Cleared missing thumbnails");
        }

        Ok(reset_count)
    }

    /// Scans whose model file is gone from storage
    pub fn missing_models(&self, files: &dyn FileStore) -> Result<Vec<Scan>> {
        let missing: Vec<Scan> = self
            .list_all_scans()?
            .into_iter()
            .filter(|s| !files.exists(Path::new(&s.model_ref)))
            .collect();

        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "Scans with missing model files");
        }

        Ok(missing)
    }

    /// Every file path any record points at
    pub fn referenced_files(&self) -> Result<HashSet<PathBuf>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT model_ref, thumbnail_ref FROM scans")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut paths = HashSet::new();
        for row in rows {
            let (model, thumbnail) = row?;
            paths.insert(PathBuf::from(model));
            if let Some(thumbnail) = thumbnail {
                paths.insert(PathBuf::from(thumbnail));
            }
        }
        Ok(paths)
    }

    /// Run one column update on a scan and return the updated record.
    fn update_scan<T: rusqlite::ToSql>(&self, id: ScanId, sql: &str, value: T) -> Result<Scan> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(sql, params![value, id.to_string()])?;
        if changed == 0 {
            return Err(Error::not_found(format!("scan {}", id)));
        }
        let scan = query_scan(&tx, id)?.ok_or_else(|| Error::not_found(format!("scan {}", id)))?;
        tx.commit()?;
        Ok(scan)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

/// Current time at the precision the catalog stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Drop blank tags; an empty list is stored as none.
fn select_folders(conn: &Connection) -> Result<Vec<Folder>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at FROM folders ORDER BY created_at DESC, rowid DESC",
    )?;
    let folders = stmt
        .query_map([], folder_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(folders)
}

fn select_all_scans(conn: &Connection) -> Result<Vec<Scan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scans ORDER BY created_at DESC, rowid DESC",
        SCAN_COLUMNS
    ))?;
    let scans = stmt
        .query_map([], scan_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(scans)
}

fn normalize_tags(tags: Option<Vec<String>>) -> Option<Vec<String>> {
    let tags: Vec<String> = tags?
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!tags.is_empty()).then_some(tags)
}

fn ensure_folder(conn: &Connection, id: FolderId) -> Result<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM folders WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    exists.ok_or_else(|| Error::not_found(format!("folder {}", id)))
}

fn query_folder(conn: &Connection, id: FolderId) -> Result<Option<Folder>> {
    let folder = conn
        .query_row(
            "SELECT id, name, created_at FROM folders WHERE id = ?1",
            params![id.to_string()],
            folder_from_row,
        )
        .optional()?;
    Ok(folder)
}

fn query_scan(conn: &Connection, id: ScanId) -> Result<Option<Scan>> {
    let scan = conn
        .query_row(
            &format!("SELECT {} FROM scans WHERE id = ?1", SCAN_COLUMNS),
            params![id.to_string()],
            scan_from_row,
        )
        .optional()?;
    Ok(scan)
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: id_column(row, 0)?,
        name: row.get(1)?,
        created_at: timestamp_column(row, 2)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<Scan> {
    let folder_id: Option<String> = row.get(8)?;
    let folder_id = folder_id
        .map(|s| FolderId::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Scan {
        id: id_column(row, 0)?,
        name: row.get(1)?,
        created_at: timestamp_column(row, 2)?,
        model_ref: row.get(3)?,
        thumbnail_ref: row.get(4)?,
        room_size: row.get(5)?,
        notes: row.get(6)?,
        tags: tags_from_json(row.get(7)?)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        folder_id,
    })
}

fn id_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = uuid::Error>,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}
