//! Short-lived cache of directory scans
//!
//! Polling clients tend to ask for the same scope many times a second; this
//! cache serves repeated requests from the last walk until it is older than
//! the configured TTL. Expiry is lazy. Each key has its own slot lock held
//! across lookup and fill, so concurrent requests for one scope share a
//! single walk while other scopes proceed independently.

use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::models::ScanItem;

/// Identity of a scan: `(relative_dir, recursive, skip_hidden)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanKey {
    /// Sanitized directory relative to the photo root
    pub relative_dir: String,
    /// Whether subdirectories were walked
    pub recursive: bool,
    /// Whether hidden entries were excluded
    pub skip_hidden: bool,
}

impl ScanKey {
    /// Create a new scan key
    pub fn new(relative_dir: impl Into<String>, recursive: bool, skip_hidden: bool) -> Self {
        Self {
            relative_dir: relative_dir.into(),
            recursive,
            skip_hidden,
        }
    }
}

#[derive(Debug)]
struct ScanEntry {
    captured_at: Instant,
    items: Arc<[ScanItem]>,
}

type Slot = Arc<Mutex<Option<ScanEntry>>>;

/// Process-wide scan cache
#[derive(Debug)]
pub struct ScanCache {
    ttl: Duration,
    slots: Mutex<HashMap<ScanKey, Slot>>,
}

impl ScanCache {
    /// Create a cache whose entries live for `ttl`; zero disables caching
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Configured entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached items for `key`, or the result of `scan` if none are fresh
    pub fn get_or_scan<F>(&self, key: &ScanKey, scan: F) -> Arc<[ScanItem]>
    where
        F: FnOnce() -> Vec<ScanItem>,
    {
        self.get_or_scan_at(key, Instant::now(), scan)
    }

    /// Same as [`ScanCache::get_or_scan`] with an explicit current instant
    pub fn get_or_scan_at<F>(&self, key: &ScanKey, now: Instant, scan: F) -> Arc<[ScanItem]>
    where
        F: FnOnce() -> Vec<ScanItem>,
    {
        if self.ttl.is_zero() {
            return scan().into();
        }

        let slot = self.slot(key, now);
        let mut entry = lock(&slot);
        if let Some(cached) = entry.as_ref() {
            if now.saturating_duration_since(cached.captured_at) <= self.ttl {
                trace!("Scan cache hit for {:?}", key);
                return Arc::clone(&cached.items);
            }
        }

        let items: Arc<[ScanItem]> = scan().into();
        *entry = Some(ScanEntry {
            captured_at: now,
            items: Arc::clone(&items),
        });
        items
    }

    /// Drop every cached scan
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    /// Number of keys with a slot; expired ones linger until a new key arrives
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Whether no scope was ever cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &ScanKey, now: Instant) -> Slot {
        let mut slots = lock(&self.slots);
        if !slots.contains_key(key) {
            self.evict_expired(&mut slots, now);
        }
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Drop expired slots nobody is holding, so the map only grows with
    /// scopes that are still fresh
    fn evict_expired(&self, slots: &mut HashMap<ScanKey, Slot>, now: Instant) {
        let before = slots.len();
        slots.retain(|_, slot| {
            // With the map locked, a count of one means no caller owns the slot
            Arc::strong_count(slot) > 1
                || lock(slot).as_ref().is_some_and(|entry| {
                    now.saturating_duration_since(entry.captured_at) <= self.ttl
                })
        });
        if slots.len() < before {
            trace!("Evicted {} expired scan slots", before - slots.len());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
