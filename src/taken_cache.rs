//! Persistent cache of capture times, keyed by relative path
//!
//! The in-memory map is authoritative while the process runs; the JSON
//! document on disk is a snapshot rewritten in full on every flush and only
//! read back at startup.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::capture;
use crate::error::IndexError;

/// Stored form of one cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakenEntry {
    /// Capture time in epoch milliseconds; `None` means nothing was found
    pub taken_ms: Option<i64>,
}

/// Capture times of every file extraction was attempted on
pub struct TakenTimeCache {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, Option<i64>>>,
    dirty: AtomicBool,
    write_lock: Mutex<()>,
}

impl TakenTimeCache {
    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self::with_entries(None, HashMap::new())
    }

    /// Open the cache backed by `path`.
    ///
    /// A missing or unreadable document starts an empty cache; entries that do
    /// not have the expected shape are skipped.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => {
                info!("Loaded {} capture times from {}", entries.len(), path.display());
                entries
            }
            Err(e) => {
                if path.exists() {
                    warn!("Ignoring unreadable capture-time cache: {}", e);
                }
                HashMap::new()
            }
        };
        Self::with_entries(Some(path), entries)
    }

    fn with_entries(path: Option<PathBuf>, entries: HashMap<String, Option<i64>>) -> Self {
        Self {
            path,
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Read a cache document from disk
    pub fn load(path: &Path) -> Result<HashMap<String, Option<i64>>, IndexError> {
        let json = std::fs::read_to_string(path).map_err(|e| IndexError::from(e).at(path))?;
        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_str(&json).map_err(|e| IndexError::from(e).at(path))?;

        let entries = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let taken = value.as_object()?.get("taken_ms")?;
                if taken.is_null() {
                    return Some((key, None));
                }
                Some((key, Some(taken.as_i64()?)))
            })
            .collect();
        Ok(entries)
    }

    /// Document location, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a capture time, extracting it from `file` on a miss.
    ///
    /// Returns the value and whether it was computed by this call. A cached
    /// `None` is a hit and is never extracted again.
    pub fn get(&self, key: &str, file: &Path) -> (Option<i64>, bool) {
        if let Some(taken) = self.lookup(key) {
            return (taken, false);
        }

        let extracted = capture::extract_taken_ms(file);
        let mut entries = self.lock_entries();
        let taken = *entries.entry(key.to_string()).or_insert(extracted);
        self.dirty.store(true, Ordering::Release);
        (taken, true)
    }

    /// Cached value without extracting; outer `None` means never attempted
    pub fn lookup(&self, key: &str) -> Option<Option<i64>> {
        self.lock_entries().get(key).copied()
    }

    /// Extract again regardless of what is cached
    pub fn refresh(&self, key: &str, file: &Path) -> Option<i64> {
        let taken = capture::extract_taken_ms(file);
        self.lock_entries().insert(key.to_string(), taken);
        self.dirty.store(true, Ordering::Release);
        taken
    }

    /// Forget a file and persist the change
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.lock_entries().remove(key).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
            self.flush_logged();
        }
        removed
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there are changes not yet written to disk
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the full snapshot to disk if anything changed.
    ///
    /// On failure the cache stays dirty so the next flush retries.
    pub fn flush(&self) -> Result<(), IndexError> {
        let Some(path) = self.path.as_deref() else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let json = {
            let entries = self.lock_entries();
            let snapshot: BTreeMap<&str, TakenEntry> = entries
                .iter()
                .map(|(key, taken)| (key.as_str(), TakenEntry { taken_ms: *taken }))
                .collect();
            serde_json::to_string(&snapshot)
        };

        let result = json
            .map_err(IndexError::from)
            .and_then(|json| write_atomically(path, json.as_bytes()));
        match result {
            Ok(()) => {
                debug!("Wrote capture-time cache to {}", path.display());
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Flush, logging instead of returning a failure
    pub fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            warn!("Failed to persist capture-time cache: {}", e);
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<i64>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for TakenTimeCache {
    fn drop(&mut self) {
        if self.is_dirty() {
            self.flush_logged();
        }
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), IndexError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| IndexError::from(e).at(parent))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| IndexError::from(e).at(&tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| IndexError::from(e).at(path))?;
    Ok(())
}
