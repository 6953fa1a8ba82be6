/// Catalog state module
///
/// This module holds the durable side of the app:
/// - SQLite catalog of folders and scans (library.rs)
/// - Schema and migrations (schema.rs)
/// - Shared record types (data.rs)

pub mod data;
pub mod library;
pub mod schema;

pub use data::{Folder, FolderId, NewScan, Scan, ScanId, SearchResults};
pub use library::MetadataStore;
