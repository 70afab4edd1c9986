//! Photo directory indexer with capture-time extraction
//!
//! This library lists the images below a photo root ordered by upload time or
//! by the capture time recorded in their EXIF, IPTC or XMP metadata. Directory
//! walks are cached for a short TTL and capture times are cached persistently
//! so repeated listings touch neither the filesystem tree nor image headers.

pub mod capture;
pub mod config;
pub mod error;
pub mod library;
pub mod models;
pub mod sanitize;
pub mod scan_cache;
pub mod scanner;
pub mod taken_cache;

pub use capture::{extract_taken_ms, parse_date_ms};
pub use config::{LibraryConfig, LibraryConfigBuilder};
pub use error::{IndexError, IndexErrorKind};
pub use library::PhotoLibrary;
pub use models::{
    ImageRecord, ListQuery, ListResponse, RescanSummary, ScanItem, SortBy, SortOrder,
};
pub use sanitize::{sanitize_relative_dir, sanitize_relative_key};
pub use scan_cache::{ScanCache, ScanKey};
pub use scanner::{list_subdirectories, scan_dir, ScanOptions};
pub use taken_cache::TakenTimeCache;
