//! Core data models for the photo index

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{DEFAULT_LIMIT, MAX_LIMIT};

/// Longest caption derived from a file name, in characters
pub const MAX_CAPTION_CHARS: usize = 80;

/// A file found by the directory scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanItem {
    /// Path relative to the photo root, `/`-separated
    pub relative_key: String,
    /// Resolved location on disk
    pub absolute_path: PathBuf,
}

impl ScanItem {
    /// Create a new scan item
    pub fn new(relative_key: impl Into<String>, absolute_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_key: relative_key.into(),
            absolute_path: absolute_path.into(),
        }
    }

    /// File name component of the key
    pub fn file_name(&self) -> &str {
        self.relative_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_key)
    }
}

/// Sort key for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Upload order (filename prefix or modification time)
    #[default]
    Upload,
    /// Capture time from embedded metadata
    Taken,
}

impl SortBy {
    /// Parse a query value; anything unknown falls back to upload order
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "taken" => SortBy::Taken,
            _ => SortBy::Upload,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Upload => "upload",
            SortBy::Taken => "taken",
        }
    }
}

/// Sort direction for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first
    Asc,
    /// Newest first
    #[default]
    Desc,
}

impl SortOrder {
    /// Parse a query value; anything but `asc` means descending
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Parameters of a listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Directories to list; empty means the photo root
    pub scopes: Vec<String>,
    /// Sort key
    pub sort_by: SortBy,
    /// Sort direction
    pub order: SortOrder,
    /// Exclusive upper bound on upload time
    pub before_ms: Option<i64>,
    /// Maximum number of records, clamped to `[1, MAX_LIMIT]`
    pub limit: usize,
    /// Whether scopes are listed recursively; `None` uses the library default
    pub recursive: Option<bool>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            sort_by: SortBy::default(),
            order: SortOrder::default(),
            before_ms: None,
            limit: DEFAULT_LIMIT,
            recursive: None,
        }
    }
}

impl ListQuery {
    /// Create a query over the given scopes with default options
    pub fn new(scopes: Vec<String>) -> Self {
        Self {
            scopes,
            ..Default::default()
        }
    }

    /// Set the sort key
    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    /// Set the sort direction
    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the pagination cursor
    pub fn before(mut self, before_ms: i64) -> Self {
        self.before_ms = Some(before_ms);
        self
    }

    /// Set the record limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Enable or disable recursion
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = Some(recursive);
        self
    }

    /// Limit clamped to the accepted range
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

/// One entry of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    /// Path relative to the photo root
    #[serde(rename = "name")]
    pub relative_key: String,
    /// Resolved location on disk
    #[serde(skip)]
    pub absolute_path: PathBuf,
    /// Upload time in epoch milliseconds
    #[serde(rename = "ts")]
    pub upload_time_ms: i64,
    /// Capture time in epoch milliseconds, if metadata carried one
    #[serde(rename = "tk")]
    pub taken_time_ms: Option<i64>,
    /// Caption embedded in the file name
    #[serde(rename = "cap")]
    pub caption: String,
}

impl ImageRecord {
    /// Build a record from a scan item, reading its modification time if needed
    pub fn from_scan_item(item: &ScanItem) -> Self {
        let name = item.file_name();
        let upload_time_ms = upload_time_from_name(name)
            .unwrap_or_else(|| modified_ms(&item.absolute_path));
        Self {
            relative_key: item.relative_key.clone(),
            absolute_path: item.absolute_path.clone(),
            upload_time_ms,
            taken_time_ms: None,
            caption: caption_from_name(name),
        }
    }

    /// Key used for ordering under the given sort mode
    pub fn sort_key(&self, sort_by: SortBy) -> i64 {
        match sort_by {
            SortBy::Upload => self.upload_time_ms,
            SortBy::Taken => self.taken_time_ms.unwrap_or(self.upload_time_ms),
        }
    }
}

/// Listing payload in the shape served to clients
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListResponse {
    /// Records in listing order
    pub items: Vec<ImageRecord>,
}

/// Outcome of a metadata rescan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanSummary {
    /// Number of image files visited
    pub rescanned: u64,
    /// Number of entries held by the taken-time cache afterwards
    pub cached: u64,
}

/// Upload time encoded as the numeric prefix before the first `-`
pub fn upload_time_from_name(name: &str) -> Option<i64> {
    name.split('-').next()?.parse().ok()
}

/// Caption encoded after `__` in the file stem, underscores read as spaces
pub fn caption_from_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    match stem.split_once("__") {
        Some((_, caption)) => caption
            .replace('_', " ")
            .trim()
            .chars()
            .take(MAX_CAPTION_CHARS)
            .collect(),
        None => String::new(),
    }
}

/// Modification time in epoch milliseconds, 0 if unavailable
fn modified_ms(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
