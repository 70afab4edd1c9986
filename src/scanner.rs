//! Scanner module - walks a scope of the photo root and collects image files

use log::{debug, warn};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use walkdir::{DirEntry, WalkDir};

use crate::models::ScanItem;

/// Options controlling one directory walk
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions<'a> {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Exclude entries with a path segment starting with `.`
    pub skip_hidden: bool,
    /// Lowercase extensions to include
    pub extensions: &'a HashSet<String>,
}

/// Collect image files under `root/relative_dir`.
///
/// `relative_dir` must already be sanitized. A missing directory or a path
/// that is not a directory yields an empty list. Symlinks are never followed
/// and only regular files are returned, in file-name order.
pub fn scan_dir(root: &Path, relative_dir: &str, options: ScanOptions<'_>) -> Vec<ScanItem> {
    let start = Instant::now();

    if options.skip_hidden && relative_dir.split('/').any(is_hidden_name) {
        return Vec::new();
    }

    let base = root.join(relative_dir);
    if !base.is_dir() {
        debug!("Scan base {} is not a directory", base.display());
        return Vec::new();
    }

    let walker = WalkDir::new(&base)
        .min_depth(1)
        .max_depth(if options.recursive { usize::MAX } else { 1 })
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        // Prune hidden directories instead of filtering their contents later
        .filter_entry(|entry| !(options.skip_hidden && entry_is_hidden(entry)));

    let mut items = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", base.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !has_image_extension(entry.path(), options.extensions) {
            continue;
        }
        let Some(relative) = relative_key(&base, entry.path()) else {
            debug!("Skipping non UTF-8 path {}", entry.path().display());
            continue;
        };
        let key = if relative_dir.is_empty() {
            relative
        } else {
            format!("{}/{}", relative_dir, relative)
        };
        items.push(ScanItem::new(key, entry.into_path()));
    }

    debug!(
        "Scanned '{}' (recursive: {}): {} images in {}ms",
        relative_dir,
        options.recursive,
        items.len(),
        start.elapsed().as_millis()
    );
    items
}

/// Names of the directories directly inside `root/relative_dir`, sorted
/// case-insensitively.
pub fn list_subdirectories(root: &Path, relative_dir: &str, skip_hidden: bool) -> Vec<String> {
    if skip_hidden && relative_dir.split('/').any(is_hidden_name) {
        return Vec::new();
    }

    let base = root.join(relative_dir);
    if !base.is_dir() {
        return Vec::new();
    }

    let mut names: Vec<String> = WalkDir::new(&base)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| !(skip_hidden && is_hidden_name(name)))
        .collect();

    names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
    names
}

/// Whether the file extension is in the whitelist (case-insensitive)
pub fn has_image_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase()))
        .unwrap_or(false)
}

fn entry_is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(is_hidden_name)
        .unwrap_or(false)
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// `/`-joined path of `path` below `base`
fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
