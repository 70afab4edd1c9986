//! Listing orchestration over the scanner and both caches

use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::LibraryConfig;
use crate::error::IndexError;
use crate::models::{ImageRecord, ListQuery, RescanSummary, ScanItem, SortBy, SortOrder};
use crate::sanitize::{sanitize_relative_dir, sanitize_relative_key};
use crate::scan_cache::{ScanCache, ScanKey};
use crate::scanner::{self, ScanOptions};
use crate::taken_cache::TakenTimeCache;

/// A photo root together with its scan and capture-time caches.
///
/// Create one per process and share it; every method takes `&self`. All
/// operations block on filesystem access, so async callers should run them
/// on a blocking pool.
pub struct PhotoLibrary {
    config: LibraryConfig,
    scan_cache: ScanCache,
    taken_cache: TakenTimeCache,
    pool: rayon::ThreadPool,
}

impl PhotoLibrary {
    /// Open a library, loading persisted capture times if configured
    pub fn new(config: LibraryConfig) -> Result<Self, IndexError> {
        let taken_cache = match &config.metadata_path {
            Some(path) => TakenTimeCache::open(path),
            None => TakenTimeCache::in_memory(),
        };
        Self::with_taken_cache(config, taken_cache)
    }

    /// Open a library around an existing capture-time cache
    pub fn with_taken_cache(
        config: LibraryConfig,
        taken_cache: TakenTimeCache,
    ) -> Result<Self, IndexError> {
        if config.root.exists() && !config.root.is_dir() {
            return Err(IndexError::invalid_path(
                config.root.clone(),
                "photo root is not a directory",
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .thread_name(|i| format!("photo-index-{}", i))
            .build()?;

        info!(
            "Photo library at {} (scan cache ttl: {}s, threads: {})",
            config.root.display(),
            config.scan_cache_ttl().as_secs(),
            pool.current_num_threads()
        );
        Ok(Self {
            scan_cache: ScanCache::new(config.scan_cache_ttl()),
            config,
            taken_cache,
            pool,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Root directory of the library
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Capture-time cache backing this library
    pub fn taken_cache(&self) -> &TakenTimeCache {
        &self.taken_cache
    }

    /// Ordered listing of the images under the query's scopes
    pub fn list_images(&self, query: &ListQuery) -> Vec<ImageRecord> {
        let recursive = query.recursive.unwrap_or(self.config.recursive);
        let items = self.merged_scan(&query.scopes, recursive);

        let mut records: Vec<ImageRecord> = items
            .iter()
            .map(ImageRecord::from_scan_item)
            .filter(|record| query.before_ms.map_or(true, |before| record.upload_time_ms < before))
            .collect();

        if query.sort_by == SortBy::Taken {
            let newly_computed = AtomicBool::new(false);
            self.pool.install(|| {
                records.par_iter_mut().for_each(|record| {
                    let (taken, fresh) =
                        self.taken_cache.get(&record.relative_key, &record.absolute_path);
                    record.taken_time_ms = taken;
                    if fresh {
                        newly_computed.store(true, Ordering::Relaxed);
                    }
                });
            });
            if newly_computed.into_inner() {
                self.taken_cache.flush_logged();
            }
        }

        sort_records(&mut records, query.sort_by, query.order);
        records.truncate(query.effective_limit());
        records
    }

    /// Names of the directories directly inside `scope`
    pub fn list_subdirectories(&self, scope: &str) -> Vec<String> {
        let relative_dir = sanitize_relative_dir(scope);
        scanner::list_subdirectories(&self.config.root, &relative_dir, self.config.skip_hidden)
    }

    /// Location of a stored image, if `relative_key` names one inside the root
    pub fn resolve_servable_path(&self, relative_key: &str) -> Option<PathBuf> {
        let key = sanitize_relative_key(relative_key)?;
        if self.config.skip_hidden && key.split('/').any(|s| s.starts_with('.')) {
            return None;
        }

        let path = self.config.root.join(&key);
        let extension = path.extension().and_then(|e| e.to_str())?;
        if !self.config.should_include_extension(extension) {
            return None;
        }
        let meta = std::fs::symlink_metadata(&path).ok()?;
        if !meta.file_type().is_file() {
            return None;
        }
        // Intermediate directories may still be symlinks pointing elsewhere
        let canonical_root = self.config.root.canonicalize().ok()?;
        let canonical = path.canonicalize().ok()?;
        canonical.starts_with(&canonical_root).then_some(path)
    }

    /// Forget the capture time of a deleted file
    pub fn evict_taken_time(&self, relative_key: &str) -> bool {
        match sanitize_relative_key(relative_key) {
            Some(key) => self.taken_cache.evict(&key),
            None => false,
        }
    }

    /// Record the capture time of a newly stored file
    pub fn record_ingested(&self, relative_key: &str) -> Option<i64> {
        let path = self.resolve_servable_path(relative_key)?;
        let key = sanitize_relative_key(relative_key)?;
        let taken = self.taken_cache.refresh(&key, &path);
        self.taken_cache.flush_logged();
        taken
    }

    /// Make sure every image under `scope` has a cached capture time
    pub fn rescan_metadata(&self, scope: &str) -> RescanSummary {
        let relative_dir = sanitize_relative_dir(scope);
        let items = scanner::scan_dir(&self.config.root, &relative_dir, self.scan_options(true));

        self.pool.install(|| {
            items.par_iter().for_each(|item| {
                self.taken_cache.get(&item.relative_key, &item.absolute_path);
            });
        });
        self.taken_cache.flush_logged();

        let summary = RescanSummary {
            rescanned: items.len() as u64,
            cached: self.taken_cache.len() as u64,
        };
        info!(
            "Rescanned '{}': {} files, {} cached capture times",
            relative_dir, summary.rescanned, summary.cached
        );
        summary
    }

    /// Scan every scope through the cache, keeping the first occurrence of a key
    fn merged_scan(&self, scopes: &[String], recursive: bool) -> Vec<ScanItem> {
        let scopes: Vec<String> = if scopes.is_empty() {
            vec![String::new()]
        } else {
            scopes.iter().map(|s| sanitize_relative_dir(s)).collect()
        };

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for relative_dir in scopes {
            let items = self.cached_scan(&relative_dir, recursive);
            for item in items.iter() {
                if seen.insert(item.relative_key.clone()) {
                    merged.push(item.clone());
                }
            }
        }
        debug!("Merged scan: {} unique images", merged.len());
        merged
    }

    fn cached_scan(&self, relative_dir: &str, recursive: bool) -> Arc<[ScanItem]> {
        let key = ScanKey::new(relative_dir, recursive, self.config.skip_hidden);
        self.scan_cache.get_or_scan(&key, || {
            scanner::scan_dir(&self.config.root, relative_dir, self.scan_options(recursive))
        })
    }

    fn scan_options(&self, recursive: bool) -> ScanOptions<'_> {
        ScanOptions {
            recursive,
            skip_hidden: self.config.skip_hidden,
            extensions: &self.config.extensions,
        }
    }
}

/// Stable sort by the selected key; equal keys keep their merge order in
/// both directions.
pub fn sort_records(records: &mut [ImageRecord], sort_by: SortBy, order: SortOrder) {
    match order {
        SortOrder::Asc => records.sort_by_key(|r| r.sort_key(sort_by)),
        SortOrder::Desc => records.sort_by(|a, b| b.sort_key(sort_by).cmp(&a.sort_key(sort_by))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fixtures::{bare_jpeg, jpeg_with_exif_date};
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn library(root: &Path, ttl_secs: u64) -> PhotoLibrary {
        let config = LibraryConfig::builder()
            .root(root)
            .scan_cache_ttl_secs(ttl_secs)
            .num_threads(2)
            .build();
        PhotoLibrary::new(config).unwrap()
    }

    fn names(records: &[ImageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.relative_key.as_str()).collect()
    }

    fn record(key: &str, ts: i64) -> ImageRecord {
        ImageRecord {
            relative_key: key.to_string(),
            absolute_path: PathBuf::from(key),
            upload_time_ms: ts,
            taken_time_ms: None,
            caption: String::new(),
        }
    }

    #[test]
    fn test_sort_is_stable_descending() {
        let mut records = vec![record("a", 100), record("b", 100), record("c", 50)];
        sort_records(&mut records, SortBy::Upload, SortOrder::Desc);
        assert_eq!(names(&records), vec!["a", "b", "c"]);

        sort_records(&mut records, SortBy::Upload, SortOrder::Asc);
        assert_eq!(names(&records), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_taken_sort_falls_back_to_upload_time() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "1700000000000-abc123-sunset.jpg", &bare_jpeg());
        write(
            root,
            "1700000100000-def456-party__Great_Night.jpg",
            &jpeg_with_exif_date("2023:11:14 10:00:00"),
        );
        let lib = library(root, 5);

        let query = ListQuery::default().sort_by(SortBy::Taken).order(SortOrder::Asc);
        let records = lib.list_images(&query);
        assert_eq!(records.len(), 2);

        let party = &records[0];
        assert_eq!(party.relative_key, "1700000100000-def456-party__Great_Night.jpg");
        assert_eq!(party.taken_time_ms, Some(1_699_956_000_000));
        assert_eq!(party.upload_time_ms, 1_700_000_100_000);
        assert_eq!(party.caption, "Great Night");

        let sunset = &records[1];
        assert_eq!(sunset.taken_time_ms, None);
        assert_eq!(sunset.upload_time_ms, 1_700_000_000_000);
        assert_eq!(sunset.caption, "");

        // Descending puts the later effective key first: the sunset's upload
        // time stands in for its missing capture time.
        let query = ListQuery::default().sort_by(SortBy::Taken).order(SortOrder::Desc);
        assert_eq!(
            names(&lib.list_images(&query)),
            vec![
                "1700000000000-abc123-sunset.jpg",
                "1700000100000-def456-party__Great_Night.jpg"
            ]
        );

        // Upload order ignores metadata entirely
        let query = ListQuery::default().order(SortOrder::Desc);
        let records = lib.list_images(&query);
        assert_eq!(records[0].relative_key, "1700000100000-def456-party__Great_Night.jpg");
        assert!(records.iter().all(|r| r.taken_time_ms.is_none()));
    }

    #[test]
    fn test_upload_sort_skips_extraction() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-a.jpg", &jpeg_with_exif_date("2023:11:14 10:00:00"));
        let lib = library(dir.path(), 5);

        lib.list_images(&ListQuery::default());
        assert!(lib.taken_cache().is_empty());

        lib.list_images(&ListQuery::default().sort_by(SortBy::Taken));
        assert_eq!(lib.taken_cache().len(), 1);
    }

    #[test]
    fn test_overlapping_scopes_dedup() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "photo.jpg", &bare_jpeg());
        write(dir.path(), "trip/beach.jpg", &bare_jpeg());
        let lib = library(dir.path(), 5);

        let query = ListQuery::new(vec!["".to_string(), "/".to_string(), "trip".to_string()]);
        let records = lib.list_images(&query);
        assert_eq!(records.iter().filter(|r| r.relative_key == "photo.jpg").count(), 1);
        assert_eq!(records.len(), 2);

        let flat = ListQuery::new(vec![".".to_string()]).recursive(false);
        assert_eq!(names(&lib.list_images(&flat)), vec!["photo.jpg"]);
    }

    #[test]
    fn test_recursion_defaults_to_config() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "top.jpg", &bare_jpeg());
        write(dir.path(), "trip/beach.jpg", &bare_jpeg());
        let config = LibraryConfig::builder()
            .root(dir.path())
            .recursive(false)
            .build();
        let lib = PhotoLibrary::new(config).unwrap();

        assert_eq!(names(&lib.list_images(&ListQuery::default())), vec!["top.jpg"]);
        let deep = ListQuery::default().recursive(true);
        assert_eq!(lib.list_images(&deep).len(), 2);
    }

    #[test]
    fn test_traversal_scope_lists_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("photos");
        write(&root, "inside.jpg", &bare_jpeg());
        write(outer.path(), "outside.jpg", &bare_jpeg());
        let lib = library(&root, 0);

        let query = ListQuery::new(vec!["../".to_string()]).recursive(false);
        assert_eq!(names(&lib.list_images(&query)), vec!["inside.jpg"]);
    }

    #[test]
    fn test_cursor_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        for ts in [100, 200, 300, 400] {
            write(dir.path(), &format!("{}-x.jpg", ts), &bare_jpeg());
        }
        let lib = library(dir.path(), 5);

        let page = lib.list_images(&ListQuery::default().limit(2));
        assert_eq!(names(&page), vec!["400-x.jpg", "300-x.jpg"]);

        let cursor = page.last().unwrap().upload_time_ms;
        let next = lib.list_images(&ListQuery::default().limit(2).before(cursor));
        assert_eq!(names(&next), vec!["200-x.jpg", "100-x.jpg"]);

        let clamped = lib.list_images(&ListQuery::default().limit(0));
        assert_eq!(clamped.len(), 1);
    }

    #[test]
    fn test_hidden_files_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.jpg", &bare_jpeg());
        write(dir.path(), ".trash/old.jpg", &bare_jpeg());
        let lib = library(dir.path(), 5);

        assert_eq!(names(&lib.list_images(&ListQuery::default())), vec!["keep.jpg"]);
        assert!(lib.resolve_servable_path(".trash/old.jpg").is_none());
    }

    #[test]
    fn test_scan_cache_serves_stale_listing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-a.jpg", &bare_jpeg());
        let cached = library(dir.path(), 3600);
        let uncached = library(dir.path(), 0);

        assert_eq!(cached.list_images(&ListQuery::default()).len(), 1);
        write(dir.path(), "2-b.jpg", &bare_jpeg());
        assert_eq!(cached.list_images(&ListQuery::default()).len(), 1);
        assert_eq!(uncached.list_images(&ListQuery::default()).len(), 2);
    }

    #[test]
    fn test_resolve_servable_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "trip/a.jpg", &bare_jpeg());
        write(dir.path(), "trip/notes.txt", b"hello");
        let lib = library(dir.path(), 5);

        assert_eq!(
            lib.resolve_servable_path("trip/a.jpg"),
            Some(dir.path().join("trip/a.jpg"))
        );
        assert_eq!(
            lib.resolve_servable_path("\\trip\\a.jpg"),
            Some(dir.path().join("trip/a.jpg"))
        );
        assert!(lib.resolve_servable_path("trip/notes.txt").is_none());
        assert!(lib.resolve_servable_path("trip/missing.jpg").is_none());
        assert!(lib.resolve_servable_path("trip").is_none());
        assert!(lib.resolve_servable_path("../trip/a.jpg").is_none());
        assert!(lib.resolve_servable_path("").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlinked_directories() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "secret.jpg", &bare_jpeg());
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        let lib = library(dir.path(), 5);

        assert!(lib.resolve_servable_path("escape/secret.jpg").is_none());
    }

    #[test]
    fn test_list_subdirectories_sanitizes_scope() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b/x.jpg", &bare_jpeg());
        write(dir.path(), "A/x.jpg", &bare_jpeg());
        write(dir.path(), "A/inner/x.jpg", &bare_jpeg());
        let lib = library(dir.path(), 5);

        assert_eq!(lib.list_subdirectories(""), vec!["A", "b"]);
        assert_eq!(lib.list_subdirectories("../.."), vec!["A", "b"]);
        assert_eq!(lib.list_subdirectories("/A/"), vec!["inner"]);

        write(dir.path(), ".trash/inner/x.jpg", &bare_jpeg());
        assert!(lib.list_subdirectories(".trash").is_empty());
    }

    #[test]
    fn test_rescan_evict_and_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("metadata_index.json");
        let root = dir.path().join("uploads");
        write(&root, "a.jpg", &jpeg_with_exif_date("2023:11:14 10:00:00"));
        write(&root, "sub/b.jpg", &bare_jpeg());

        let config = LibraryConfig::builder()
            .root(&root)
            .metadata_path(&doc)
            .num_threads(2)
            .build();
        let lib = PhotoLibrary::new(config).unwrap();

        let summary = lib.rescan_metadata("");
        assert_eq!(summary, RescanSummary { rescanned: 2, cached: 2 });
        assert_eq!(TakenTimeCache::load(&doc).unwrap().len(), 2);

        assert!(lib.evict_taken_time("sub/b.jpg"));
        assert!(!lib.evict_taken_time("../sub/b.jpg"));
        assert_eq!(TakenTimeCache::load(&doc).unwrap().len(), 1);

        write(&root, "sub/b.jpg", &jpeg_with_exif_date("2020:01:01 00:00:00"));
        assert_eq!(lib.record_ingested("sub/b.jpg"), Some(1_577_836_800_000));
        let persisted = TakenTimeCache::load(&doc).unwrap();
        assert_eq!(persisted.get("sub/b.jpg"), Some(&Some(1_577_836_800_000)));
    }

    #[test]
    fn test_taken_listing_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("metadata_index.json");
        let root = dir.path().join("uploads");
        for i in 0..5 {
            write(&root, &format!("{}-p.jpg", i), &bare_jpeg());
        }
        let config = LibraryConfig::builder()
            .root(&root)
            .metadata_path(&doc)
            .build();
        let lib = PhotoLibrary::new(config).unwrap();

        lib.list_images(&ListQuery::default().sort_by(SortBy::Taken));
        assert!(!lib.taken_cache().is_dirty());
        assert_eq!(TakenTimeCache::load(&doc).unwrap().len(), 5);

        // A restart reuses the persisted outcomes instead of extracting again
        drop(lib);
        let config = LibraryConfig::builder()
            .root(&root)
            .metadata_path(&doc)
            .build();
        let lib = PhotoLibrary::new(config).unwrap();
        assert_eq!(lib.taken_cache().lookup("0-p.jpg"), Some(None));
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(PhotoLibrary::new(LibraryConfig::new(&file)).is_err());

        // A root that does not exist yet is fine and simply lists nothing
        let lib = PhotoLibrary::new(LibraryConfig::new(dir.path().join("later"))).unwrap();
        assert!(lib.list_images(&ListQuery::default()).is_empty());
    }
}
