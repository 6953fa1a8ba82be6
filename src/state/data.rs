/// Shared data structures for the scan catalog
///
/// These structs represent the data model that flows between
/// the database layer and the caller. They are snapshots: the
/// catalog owns the canonical copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a folder. Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(Uuid);

/// Identifier of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(FolderId);
uuid_id!(ScanId);

/// A user-named group of scans
///
/// The scans it contains are not stored here; ask the catalog
/// for `list_scans(Some(folder.id))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A saved room scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Path of the exported model file. Never changes after creation.
    pub model_ref: String,
    /// Path of the preview image, if one was generated
    pub thumbnail_ref: Option<String>,
    /// Free-form size descriptor, e.g. "4.2 × 3.1 × 2.5 m"
    pub room_size: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Owning folder, or None when unfiled
    pub folder_id: Option<FolderId>,
}

/// Everything needed to insert a scan record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewScan {
    pub name: String,
    pub model_ref: String,
    pub folder_id: Option<FolderId>,
    pub thumbnail_ref: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub room_size: Option<String>,
}

impl NewScan {
    pub fn new(name: impl Into<String>, model_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_ref: model_ref.into(),
            ..Self::default()
        }
    }

    pub fn in_folder(mut self, folder_id: FolderId) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_ref: impl Into<String>) -> Self {
        self.thumbnail_ref = Some(thumbnail_ref.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// Folders and scans matching a search query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub folders: Vec<Folder>,
    pub scans: Vec<Scan>,
}

/// True when the name has at least one non-whitespace character
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
}

/// Tags are stored as a JSON array in a single column
pub(crate) fn tags_to_json(tags: &Option<Vec<String>>) -> Result<Option<String>, serde_json::Error> {
    tags.as_ref().map(serde_json::to_string).transpose()
}

pub(crate) fn tags_from_json(json: Option<String>) -> Result<Option<Vec<String>>, serde_json::Error> {
    json.as_deref().map(serde_json::from_str).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_names_are_invalid() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("\t\n"));
        assert!(is_valid_name("Garage"));
        assert!(is_valid_name("  Attic "));
    }

    #[test]
    fn test_ids_parse_from_display() {
        let id = ScanId::new();
        let parsed: ScanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<FolderId>().is_err());
    }

    #[test]
    fn test_tags_json_keeps_duplicates_and_none() {
        let tags = Some(vec!["kitchen".to_string(), "kitchen".to_string()]);
        let json = tags_to_json(&tags).unwrap();
        assert_eq!(tags_from_json(json).unwrap(), tags);

        assert_eq!(tags_to_json(&None).unwrap(), None);
        assert_eq!(tags_from_json(None).unwrap(), None);
    }

    #[test]
    fn test_new_scan_builder() {
        let folder = FolderId::new();
        let scan = NewScan::new("Kitchen", "/tmp/a.obj")
            .in_folder(folder)
            .with_notes("north wall")
            .with_tags(["reno"]);

        assert_eq!(scan.folder_id, Some(folder));
        assert_eq!(scan.notes.as_deref(), Some("north wall"));
        assert_eq!(scan.tags, Some(vec!["reno".to_string()]));
        assert_eq!(scan.thumbnail_ref, None);
    }
}
